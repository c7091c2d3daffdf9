use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use beems_core::{
    BeemsError, Client, HandlerError, InMemoryEngine, JobContext, JobOptions, Options, Server,
    Service, TypedMethod, handler_fn, init_logging,
};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
struct HelloPayload {
    name: String,
}

/// Fails a fixed number of times before greeting.
struct Hello {
    remaining_failures: AtomicU32,
}

impl Hello {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl TypedMethod<HelloPayload> for Hello {
    type Output = String;

    async fn call(&self, input: HelloPayload, ctx: &JobContext) -> Result<String, HandlerError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(HandlerError::new(format!("intentional failure (left={left})")));
        }
        ctx.report_progress(100).await;
        Ok(format!("Hello, {}!", input.name))
    }
}

fn calc() -> Result<Service, BeemsError> {
    let service = Service::new("calc")?
        .method(
            "echo",
            handler_fn(|ctx: JobContext| async move { Ok(Value::Object(ctx.data().clone())) }),
        )?
        .method(
            "boom",
            handler_fn(|_ctx: JobContext| async move { Err(HandlerError::new("boom")) }),
        )?
        .method(
            "sleep",
            handler_fn(|ctx: JobContext| async move {
                let ms = ctx.data().get("ms").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!({ "slept": ms }))
            }),
        )?
        .typed("hello", Hello::new(2))?;
    Ok(service)
}

fn load_options() -> Result<Options, BeemsError> {
    match std::env::args().nth(1) {
        Some(path) => Ok(Options::from_json_file(path)?),
        None => Ok(Options::default()),
    }
}

fn report(label: &str, result: Result<beems_core::Reply, BeemsError>) {
    match result {
        Ok(reply) => println!(
            "{label}: ok job={} attempts={} response={}",
            reply.job.id, reply.job.attempts, reply.response
        ),
        Err(err) => println!("{label}: failed: {err}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), BeemsError> {
    let options = load_options()?;
    init_logging(&options.logging);

    // (A) one engine shared by both sides, standing in for Redis
    let engine = InMemoryEngine::new();

    // (B) worker side
    let server = Server::new(Arc::new(engine.clone()), options.clone());
    server.add_service(calc()?, Some(2), None).await?;
    let services = server.services().await;
    tracing::info!(?services, "server running");

    // (C) producer side
    let client = Client::new(Arc::new(engine), options);
    client.accept_service("calc", None).await?;

    report("echo", client.send("calc", "echo", &json!({ "t": 1234 }), None).await);
    report("boom", client.send("calc", "boom", &json!({}), None).await);

    let timeout = JobOptions::new().with_timeout(Duration::from_millis(100));
    report(
        "timeout",
        client
            .send("calc", "sleep", &json!({ "ms": 1000 }), Some(&timeout))
            .await,
    );

    let retries = JobOptions::new().with_retries(3);
    report(
        "hello",
        client
            .send("calc", "hello", &json!({ "name": "beems" }), Some(&retries))
            .await,
    );

    let health = client.health(Some("calc")).await?;
    println!("health: {}", serde_json::to_string(&health).unwrap_or_default());

    // (D) graceful shutdown
    client.close().await?;
    server.close().await?;
    tracing::info!("demo finished");
    Ok(())
}
