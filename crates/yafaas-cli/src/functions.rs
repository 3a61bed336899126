//! 組み込みの関数モジュール
//!
//! 動的ロードはしないので、バイナリに含めるモジュールはここで登録する。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use yafaas_core::app::{Callback, InvocationContext};
use yafaas_core::domain::HandlerError;
use yafaas_core::typed::{
    EventHandler, Module, ModuleRegistry, RegistryError, Response, TypedHandler, async_handler,
    handler_fn,
};

const ERROR_THRESHOLD: f64 = 0.5;

pub fn registry() -> Result<ModuleRegistry, RegistryError> {
    let mut registry = ModuleRegistry::new();
    registry.register("index", index_module())?;
    Ok(registry)
}

fn index_module() -> Module {
    Module::new()
        .handler(
            "handler",
            async_handler(|payload, ctx: InvocationContext| async move {
                tracing::info!(event_id = %ctx.event_id(), %payload, "Hello world");
                randomly_fail()?;
                Ok::<_, HandlerError>(Some(json!({ "message": "hello event service" })))
            }),
        )
        .handler("greet", TypedHandler::<Greet, _>::new(Greeter))
        .namespace(
            "legacy",
            Module::new().handler(
                "callback",
                handler_fn(|payload, _ctx, callback: Callback| {
                    callback.call(None, Some(json!({ "echo": payload })));
                    Ok(Response::Empty)
                }),
            ),
        )
}

fn randomly_fail() -> Result<(), HandlerError> {
    if rand::random::<f64>() > ERROR_THRESHOLD {
        tracing::warn!("Error occured in handler function.");
        return Err(HandlerError::new("Random error occurred!"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct Greet {
    name: String,
}

#[derive(Debug, Serialize)]
struct Greeting {
    greeting: String,
}

struct Greeter;

#[async_trait]
impl EventHandler<Greet> for Greeter {
    type Output = Greeting;

    async fn handle(&self, event: Greet, _ctx: InvocationContext) -> Result<Greeting, HandlerError> {
        Ok(Greeting {
            greeting: format!("hello {}", event.name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yafaas_core::ports::{HandlerLoader, HandlerRef};

    #[test]
    fn bundled_handlers_resolve() {
        let registry = registry().unwrap();
        for reference in ["index.handler", "index.greet", "index.legacy.callback"] {
            let reference = HandlerRef::parse(reference).unwrap();
            assert!(registry.load(&reference).is_ok(), "{reference} should load");
        }
    }

    #[test]
    fn namespace_is_not_callable() {
        let registry = registry().unwrap();
        let reference = HandlerRef::parse("index.legacy").unwrap();
        assert!(registry.load(&reference).is_err());
    }
}
