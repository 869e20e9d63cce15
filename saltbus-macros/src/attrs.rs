use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Attribute, Expr, Ident, LitStr, Result, Token, parse::Parse, parse::ParseStream};

/// `key = value` 或裸 `key`
pub(crate) struct Kv {
    pub key: Ident,
    pub value: Option<Expr>,
}

impl Parse for Kv {
    fn parse(input: ParseStream) -> Result<Self> {
        let key: Ident = input.parse()?;
        let value = if input.peek(Token![=]) {
            let _eq: Token![=] = input.parse()?;
            Some(input.parse()?)
        } else {
            None
        };
        Ok(Self { key, value })
    }
}

/// 容器参数 `#[payload(name = "...")]`，以及 `#[serde(rename_all = "...")]`
#[derive(Default)]
pub(crate) struct ContainerAttrs {
    pub name: Option<LitStr>,
    pub rename_all: Option<RenameRule>,
}

/// 与 serde `rename_all` 相同的字段名变换
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RenameRule {
    Lower,
    Upper,
    Pascal,
    Camel,
    Snake,
    ScreamingSnake,
    Kebab,
    ScreamingKebab,
}

impl RenameRule {
    fn from_lit(lit: &LitStr) -> Result<Self> {
        Ok(match lit.value().as_str() {
            "lowercase" => RenameRule::Lower,
            "UPPERCASE" => RenameRule::Upper,
            "PascalCase" => RenameRule::Pascal,
            "camelCase" => RenameRule::Camel,
            "snake_case" => RenameRule::Snake,
            "SCREAMING_SNAKE_CASE" => RenameRule::ScreamingSnake,
            "kebab-case" => RenameRule::Kebab,
            "SCREAMING-KEBAB-CASE" => RenameRule::ScreamingKebab,
            _ => {
                return Err(syn::Error::new(
                    lit.span(),
                    "unknown rename rule; expected one of lowercase, UPPERCASE, PascalCase, camelCase, snake_case, SCREAMING_SNAKE_CASE, kebab-case, SCREAMING-KEBAB-CASE",
                ));
            }
        })
    }

    /// 字段名按 snake_case 书写
    pub fn apply(self, field: &str) -> String {
        match self {
            RenameRule::Lower | RenameRule::Snake => field.to_string(),
            RenameRule::Upper | RenameRule::ScreamingSnake => field.to_ascii_uppercase(),
            RenameRule::Pascal => pascal(field),
            RenameRule::Camel => {
                let pascal = pascal(field);
                let mut chars = pascal.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
                    None => pascal,
                }
            }
            RenameRule::Kebab => field.replace('_', "-"),
            RenameRule::ScreamingKebab => field.to_ascii_uppercase().replace('_', "-"),
        }
    }
}

fn pascal(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut capitalize = true;
    for ch in field.chars() {
        if ch == '_' {
            capitalize = true;
        } else if capitalize {
            out.push(ch.to_ascii_uppercase());
            capitalize = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// 字段参数 `#[field(...)]`
#[derive(Default)]
pub(crate) struct FieldAttrs {
    pub rename: Option<LitStr>,
    pub description: Option<LitStr>,
    pub default: Option<Expr>,
    pub min_length: Option<Expr>,
    pub max_length: Option<Expr>,
    pub minimum: Option<Expr>,
    pub maximum: Option<Expr>,
    pub pattern: Option<LitStr>,
    pub format: Option<StringFormatKind>,
    pub skip: bool,
}

#[derive(Clone, Copy)]
pub(crate) enum StringFormatKind {
    Email,
    Uuid,
    DateTime,
}

impl StringFormatKind {
    pub fn variant(self) -> &'static str {
        match self {
            StringFormatKind::Email => "Email",
            StringFormatKind::Uuid => "Uuid",
            StringFormatKind::DateTime => "DateTime",
        }
    }
}

fn parse_kvs(attr: &Attribute) -> Result<Punctuated<Kv, Token![,]>> {
    attr.parse_args_with(Punctuated::<Kv, Token![,]>::parse_terminated)
}

fn require_value(kv: Kv) -> Result<(Ident, Expr)> {
    match kv.value {
        Some(value) => Ok((kv.key, value)),
        None => Err(syn::Error::new(
            kv.key.span(),
            format!("'{}' expects a value", kv.key),
        )),
    }
}

fn lit_str(value: &Expr) -> Result<LitStr> {
    match value {
        Expr::Lit(syn::ExprLit {
            lit: syn::Lit::Str(s),
            ..
        }) => Ok(s.clone()),
        other => Err(syn::Error::new(other.span(), "expected string literal")),
    }
}

fn set_once<T>(slot: &mut Option<T>, key: &Ident, value: T) -> Result<()> {
    if slot.is_some() {
        return Err(syn::Error::new(
            key.span(),
            format!("duplicate key '{key}' in attribute"),
        ));
    }
    *slot = Some(value);
    Ok(())
}

pub(crate) fn container_attrs(attrs: &[Attribute]) -> Result<ContainerAttrs> {
    let mut out = ContainerAttrs::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename_all") {
                if meta.input.peek(Token![=]) {
                    let lit: LitStr = meta.value()?.parse()?;
                    out.rename_all = Some(RenameRule::from_lit(&lit)?);
                } else {
                    // rename_all(serialize = "...", deserialize = "...")：以序列化方向为准
                    meta.parse_nested_meta(|inner| {
                        let lit: LitStr = inner.value()?.parse()?;
                        if inner.path.is_ident("serialize") {
                            out.rename_all = Some(RenameRule::from_lit(&lit)?);
                        }
                        Ok(())
                    })?;
                }
            } else {
                skip_meta(&meta)?;
            }
            Ok(())
        })?;
    }
    for attr in attrs.iter().filter(|a| a.path().is_ident("payload")) {
        for kv in parse_kvs(attr)? {
            let (key, value) = require_value(kv)?;
            if key == "name" {
                set_once(&mut out.name, &key, lit_str(&value)?)?;
            } else {
                return Err(syn::Error::new(key.span(), "unknown key; expected 'name'"));
            }
        }
    }
    Ok(out)
}

fn skip_meta(meta: &syn::meta::ParseNestedMeta) -> Result<()> {
    if meta.input.peek(Token![=]) {
        let _: Expr = meta.value()?.parse()?;
    } else if meta.input.peek(syn::token::Paren) {
        let _content;
        syn::parenthesized!(_content in meta.input);
    }
    Ok(())
}

pub(crate) fn field_attrs(attrs: &[Attribute]) -> Result<FieldAttrs> {
    let mut out = FieldAttrs::default();
    let mut serde_rename: Option<LitStr> = None;

    for attr in attrs {
        if attr.path().is_ident("serde") {
            // 只关心 rename / skip，其余参数交给 serde 自己
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename") && meta.input.peek(Token![=]) {
                    serde_rename = Some(meta.value()?.parse()?);
                } else if meta.path.is_ident("skip") {
                    out.skip = true;
                } else {
                    skip_meta(&meta)?;
                }
                Ok(())
            })?;
            continue;
        }
        if !attr.path().is_ident("field") {
            continue;
        }

        for kv in parse_kvs(attr)? {
            if kv.key == "skip" {
                if kv.value.is_some() {
                    return Err(syn::Error::new(kv.key.span(), "'skip' takes no value"));
                }
                out.skip = true;
                continue;
            }
            let (key, value) = require_value(kv)?;
            match key.to_string().as_str() {
                "rename" => set_once(&mut out.rename, &key, lit_str(&value)?)?,
                "description" => set_once(&mut out.description, &key, lit_str(&value)?)?,
                "default" => set_once(&mut out.default, &key, value)?,
                "min_length" => set_once(&mut out.min_length, &key, value)?,
                "max_length" => set_once(&mut out.max_length, &key, value)?,
                "minimum" => set_once(&mut out.minimum, &key, value)?,
                "maximum" => set_once(&mut out.maximum, &key, value)?,
                "pattern" => {
                    let lit = lit_str(&value)?;
                    set_once(&mut out.pattern, &key, lit)?
                }
                "format" => {
                    let lit = lit_str(&value)?;
                    let kind = match lit.value().as_str() {
                        "email" => StringFormatKind::Email,
                        "uuid" => StringFormatKind::Uuid,
                        "date-time" => StringFormatKind::DateTime,
                        _ => {
                            return Err(syn::Error::new(
                                lit.span(),
                                "unknown format; expected 'email', 'uuid' or 'date-time'",
                            ));
                        }
                    };
                    set_once(&mut out.format, &key, kind)?
                }
                _ => {
                    return Err(syn::Error::new(
                        key.span(),
                        "unknown key; expected one of description, default, min_length, max_length, minimum, maximum, pattern, format, rename, skip",
                    ));
                }
            }
        }
    }

    if out.rename.is_none() {
        out.rename = serde_rename;
    }
    Ok(out)
}

/// 收集 `///` 文档注释作为缺省描述
pub(crate) fn doc_comment(attrs: &[Attribute]) -> Option<String> {
    let lines: Vec<String> = attrs
        .iter()
        .filter(|a| a.path().is_ident("doc"))
        .filter_map(|a| match &a.meta {
            syn::Meta::NameValue(nv) => lit_str(&nv.value).ok().map(|s| s.value().trim().to_string()),
            _ => None,
        })
        .filter(|line| !line.is_empty())
        .collect();
    (!lines.is_empty()).then(|| lines.join(" "))
}
