use saltbus_core::dispatch::{HandlerContext, HandlerError, RpcError};
use saltbus_macros::Payload;
use saltbus_runtime::telemetry::init_tracing;
use saltbus_runtime::{DeclareOptions, RpcResponse, Salt, SaltConfig, SubscribeOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Payload)]
#[payload(name = "UserSignup")]
struct UserSignup {
    #[field(minimum = 1)]
    user_id: i64,
    #[field(format = "email")]
    email: String,
    #[field(default = "free")]
    plan: String,
}

#[derive(Debug, Serialize, Deserialize, Payload)]
struct AddRequest {
    a: f64,
    b: f64,
}

#[derive(Debug, Serialize, Deserialize, Payload)]
struct AddResponse {
    result: f64,
}

#[derive(Debug, Serialize, Deserialize, Payload)]
struct AddError {
    error_code: String,
    error_message: String,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let salt = Salt::new(SaltConfig::load(None)?)?;

    // 声明
    let signup = salt
        .declare::<UserSignup>("user.signup.completed", DeclareOptions::default())
        .await?;
    salt.declare_response::<AddResponse>("rpc.add")?;
    salt.declare_error::<AddError>("rpc.add")?;
    let add = salt
        .declare_rpc::<AddRequest>("rpc.add", DeclareOptions::default())
        .await?;

    // 订阅
    salt.subscribe_typed(
        "user.signup.completed",
        "welcome_email",
        SubscribeOptions::default(),
        |ctx: HandlerContext, event: UserSignup| async move {
            tracing::info!(user_id = event.user_id, plan = %event.plan, task_id = %ctx.task_id, "sending welcome email");
            Ok::<_, HandlerError>(())
        },
    )
    .await?;
    salt.subscribe_typed("rpc.add", "adder", SubscribeOptions::default(), |_ctx, req: AddRequest| async move {
        if !(req.a + req.b).is_finite() {
            return Err(HandlerError::Rpc(RpcError::new("OVERFLOW", "result is not finite")));
        }
        Ok(AddResponse { result: req.a + req.b })
    })
    .await?;

    let worker = salt.start().await?;

    signup
        .publish(&UserSignup {
            user_id: 123,
            email: "a@b.com".into(),
            plan: "pro".into(),
        })
        .await?;

    match add.call(&AddRequest { a: 10.0, b: 32.0 }, Some(Duration::from_secs(5))).await? {
        RpcResponse::Success(payload) => println!("rpc.add -> {}", payload["result"]),
        other => println!("rpc.add failed: {}", other.payload()),
    }

    match add.call(&AddRequest { a: f64::MAX, b: f64::MAX }, None).await? {
        RpcResponse::Error(payload) => println!("rpc.add rejected: {}", payload["error_message"]),
        other => println!("unexpected: {}", other.payload()),
    }

    worker.shutdown();
    worker.join().await;
    Ok(())
}
