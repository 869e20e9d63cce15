use crate::attrs::{container_attrs, doc_comment, field_attrs};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::spanned::Spanned;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// #[derive(Payload)] 实现
/// - 仅支持具名字段结构体，字段按声明顺序输出
/// - 字段名依次取 `field(rename)`、`serde(rename)`、容器 `serde(rename_all)` 变换后的字段名
/// - 字段类型经 `FieldType` 映射到 `FieldKind`；`Option<T>` 为可选，带 `default` 的字段亦为可选
pub(crate) fn expand(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match build(&input) {
        Ok(ts) => ts.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn build(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let named = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(f) => &f.named,
            _ => {
                return Err(syn::Error::new(
                    input.span(),
                    "#[derive(Payload)] only supports named-field struct",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "#[derive(Payload)] only supports struct",
            ));
        }
    };

    let container = container_attrs(&input.attrs)?;
    let name = container
        .name
        .as_ref()
        .map(|lit| lit.value())
        .unwrap_or_else(|| ident.to_string());

    let mut field_exprs = Vec::new();
    for field in named {
        let attrs = field_attrs(&field.attrs)?;
        if attrs.skip {
            continue;
        }
        let Some(field_ident) = field.ident.as_ref() else {
            continue;
        };
        let field_name = match &attrs.rename {
            Some(lit) => lit.value(),
            None => {
                let raw = field_ident.to_string();
                let raw = raw.trim_start_matches("r#");
                match container.rename_all {
                    Some(rule) => rule.apply(raw),
                    None => raw.to_string(),
                }
            }
        };
        let ty = &field.ty;

        let mut steps: Vec<TokenStream2> = Vec::new();
        if let Some(default) = &attrs.default {
            steps.push(quote! { field = field.with_default(::saltbus_core::serde_json::json!(#default)); });
        }
        let description = attrs
            .description
            .as_ref()
            .map(|lit| lit.value())
            .or_else(|| doc_comment(&field.attrs));
        if let Some(desc) = description {
            steps.push(quote! { field = field.describe(#desc); });
        }
        if let Some(format) = attrs.format {
            let variant = format_ident!("{}", format.variant());
            steps.push(quote! { field = field.format(::saltbus_core::schema::StringFormat::#variant); });
        }
        if let Some(v) = &attrs.min_length {
            steps.push(quote! { field = field.min_length((#v) as u64); });
        }
        if let Some(v) = &attrs.max_length {
            steps.push(quote! { field = field.max_length((#v) as u64); });
        }
        if let Some(v) = &attrs.minimum {
            steps.push(quote! { field = field.minimum((#v) as f64); });
        }
        if let Some(v) = &attrs.maximum {
            steps.push(quote! { field = field.maximum((#v) as f64); });
        }
        if let Some(p) = &attrs.pattern {
            steps.push(quote! { field = field.pattern(#p); });
        }

        field_exprs.push(quote! {
            {
                #[allow(unused_mut)]
                let mut field = ::saltbus_core::schema::FieldSpec::new(
                    #field_name,
                    <#ty as ::saltbus_core::schema::FieldType>::kind(),
                )
                .required(<#ty as ::saltbus_core::schema::FieldType>::REQUIRED);
                #( #steps )*
                field
            }
        });
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::saltbus_core::schema::Payload for #ident #ty_generics #where_clause {
            const NAME: &'static str = #name;

            fn fields() -> ::std::vec::Vec<::saltbus_core::schema::FieldSpec> {
                ::std::vec![ #( #field_exprs ),* ]
            }
        }

        impl #impl_generics ::saltbus_core::schema::FieldType for #ident #ty_generics #where_clause {
            fn kind() -> ::saltbus_core::schema::FieldKind {
                ::saltbus_core::schema::FieldKind::Record {
                    title: ::std::string::String::from(#name),
                    fields: <Self as ::saltbus_core::schema::Payload>::fields(),
                }
            }
        }
    })
}
