//! 命令处理器注册表（HandlerRegistry）
//!
//! - 在启动期由组合根显式构建，之后只读（查找无需加锁）；
//! - 以类型擦除闭包保存处理器，校验时产出的类型化参数以 `Any` 携带到执行阶段；
//! - 按来源（`HandlerSource`）尽力注册：某个来源加载失败或冲突，只影响该来源本身。
//!
use crate::command_handler::{CommandHandler, HandlerOutput};
use crate::error::RegistryError;
use crate::schema::INVALID_PARAMETERS;
use futures_util::FutureExt;
use gateway_domain::command::{Command, Params};
use gateway_domain::error::{GatewayError, GatewayResult};
use gateway_domain::persist::{CommandStore, CommandTransaction};
use serde_json::Value;
use std::any::{Any, type_name};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

type BoxAnySend = Box<dyn Any + Send>;

type RunFuture = Pin<Box<dyn Future<Output = anyhow::Result<HandlerOutput>> + Send>>;

type ValidateFn = Arc<dyn Fn(&Params) -> GatewayResult<(Params, BoxAnySend)> + Send + Sync>;

type AuthorizeFn = Arc<dyn Fn(&Command) -> GatewayResult<()> + Send + Sync>;

type RunFn = Arc<dyn Fn(Arc<Command>, BoxAnySend) -> RunFuture + Send + Sync>;

/// 已注册（类型擦除）的处理器
#[derive(Clone)]
pub struct RegisteredHandler {
    command_type: &'static str,
    validate: ValidateFn,
    authorize: AuthorizeFn,
    run: RunFn,
}

impl RegisteredHandler {
    pub fn new<H: CommandHandler>(handler: Arc<H>) -> Self {
        let validate: ValidateFn = {
            let handler = handler.clone();

            Arc::new(move |raw: &Params| {
                let typed = handler.validate(raw)?;
                let normalized = match serde_json::to_value(&typed) {
                    Ok(Value::Object(map)) => map,
                    Ok(_) => Params::new(),
                    Err(err) => {
                        return Err(GatewayError::command_rejected(format!(
                            "{INVALID_PARAMETERS} {err}"
                        )));
                    }
                };
                Ok((normalized, Box::new(typed) as BoxAnySend))
            })
        };

        let authorize: AuthorizeFn = {
            let handler = handler.clone();
            Arc::new(move |command: &Command| handler.authorize(command))
        };

        let run: RunFn = {
            let handler = handler.clone();

            Arc::new(move |command: Arc<Command>, boxed_params: BoxAnySend| {
                let handler = handler.clone();

                Box::pin(async move {
                    // 正常情况下这里的 downcast 永远不会失败（校验与执行闭包同一泛型 H）
                    let params = boxed_params.downcast::<H::Params>().map_err(|_| {
                        anyhow::anyhow!("type mismatch: expected={}", type_name::<H::Params>())
                    })?;
                    handler.run(&command, *params).await
                }) as RunFuture
            })
        };

        Self {
            command_type: H::COMMAND_TYPE,
            validate,
            authorize,
            run,
        }
    }

    pub fn command_type(&self) -> &'static str {
        self.command_type
    }
}

impl fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("command_type", &self.command_type)
            .finish_non_exhaustive()
    }
}

/// 通过校验的命令：参数已替换为规范化值，类型化参数随之携带
pub struct ValidatedCommand {
    command: Command,
    handler: RegisteredHandler,
    params: BoxAnySend,
}

impl ValidatedCommand {
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn command_type(&self) -> &'static str {
        self.handler.command_type
    }

    /// 调用处理器的授权检查
    pub fn authorize(&self) -> GatewayResult<()> {
        (self.handler.authorize)(&self.command)
    }

    /// 持久化命令并打开事务（写入命令标识）
    pub async fn persist(
        &mut self,
        store: Arc<dyn CommandStore>,
    ) -> GatewayResult<CommandTransaction> {
        CommandTransaction::open(store, &mut self.command).await
    }

    /// 执行处理器；处理器的 panic 同样转换为错误
    pub(crate) async fn run(self) -> anyhow::Result<HandlerOutput> {
        let future = (self.handler.run)(Arc::new(self.command), self.params);

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(anyhow::anyhow!(
                "handler panicked: {}",
                panic_message(&*panic)
            )),
        }
    }
}

impl fmt::Debug for ValidatedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedCommand")
            .field("command", &self.command)
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

/// 一个来源提供的处理器集合（注册前的暂存区）
#[derive(Default)]
pub struct HandlerSet {
    handlers: Vec<RegisteredHandler>,
}

impl HandlerSet {
    pub fn add<H: CommandHandler>(&mut self, handler: Arc<H>) -> &mut Self {
        self.handlers.push(RegisteredHandler::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// 处理器来源：在启动期向注册表提供零个或多个处理器
pub trait HandlerSource: Send + Sync {
    /// 来源名称（用于日志）
    fn name(&self) -> &str;

    /// 构造并加入处理器；返回错误时该来源的处理器全部不注册
    fn register(&self, handlers: &mut HandlerSet) -> anyhow::Result<()>;
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, RegisteredHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器；同一命令类型重复注册返回冲突，先注册者保持有效
    pub fn register<H: CommandHandler>(&mut self, handler: Arc<H>) -> Result<(), RegistryError> {
        self.insert(RegisteredHandler::new(handler))
    }

    fn insert(&mut self, handler: RegisteredHandler) -> Result<(), RegistryError> {
        let command_type = handler.command_type;
        if self.handlers.contains_key(command_type) {
            return Err(RegistryError::AlreadyRegistered { command_type });
        }

        self.handlers.insert(command_type, handler);
        tracing::info!(command_type, "registered command handler");

        Ok(())
    }

    /// 注册一个来源的全部处理器
    ///
    /// 来源加载失败或其中任一处理器冲突时记录日志并返回 `false`，注册表保持不变。
    pub fn register_source(&mut self, source: &dyn HandlerSource) -> bool {
        let mut staged = HandlerSet::default();

        if let Err(err) = source.register(&mut staged) {
            tracing::warn!(
                source = source.name(),
                error = %format!("{err:#}"),
                "unable to load command handlers from source"
            );
            return false;
        }

        let mut seen = HashSet::new();
        for handler in &staged.handlers {
            let command_type = handler.command_type;
            if self.handlers.contains_key(command_type) || !seen.insert(command_type) {
                tracing::error!(
                    source = source.name(),
                    command_type,
                    "handler already registered; skipping source"
                );
                return false;
            }
        }

        for handler in staged.handlers {
            // 上面已排除冲突
            let _ = self.insert(handler);
        }

        true
    }

    /// 按命令类型查找处理器
    pub fn get(&self, command_type: &str) -> GatewayResult<&RegisteredHandler> {
        self.handlers.get(command_type).ok_or_else(|| {
            GatewayError::command_rejected(format!("Unknown command: {command_type}"))
        })
    }

    /// 校验命令参数，并以类型化值替换原始参数（未声明的字段被丢弃）
    pub fn validate(&self, mut command: Command) -> GatewayResult<ValidatedCommand> {
        let handler = self.get(command.command_type())?.clone();

        let (normalized, params) = (handler.validate)(command.params())?;
        command.replace_params(normalized)?;

        Ok(ValidatedCommand {
            command,
            handler,
            params,
        })
    }

    pub fn contains(&self, command_type: &str) -> bool {
        self.handlers.contains_key(command_type)
    }

    /// 已注册的命令类型列表（按名称排序）
    pub fn registered_commands(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("commands", &self.registered_commands())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_handler::NoParams;
    use crate::schema::{FieldKind, ParamSchema};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Greeting {
        name: String,
    }

    struct GreetHandler {
        greeting: &'static str,
    }

    #[async_trait]
    impl CommandHandler for GreetHandler {
        const COMMAND_TYPE: &'static str = "greet";
        type Params = Greeting;

        fn schema(&self) -> ParamSchema {
            ParamSchema::new().required("name", FieldKind::String)
        }

        async fn run(&self, _command: &Command, params: Greeting) -> anyhow::Result<HandlerOutput> {
            Ok(HandlerOutput::with_result(json!(format!(
                "{}, {}",
                self.greeting, params.name
            ))))
        }
    }

    struct PingHandler;

    #[async_trait]
    impl CommandHandler for PingHandler {
        const COMMAND_TYPE: &'static str = "ping";
        type Params = NoParams;

        fn schema(&self) -> ParamSchema {
            ParamSchema::new()
        }

        async fn run(&self, _command: &Command, _params: NoParams) -> anyhow::Result<HandlerOutput> {
            panic!("boom")
        }
    }

    fn command(ty: &str, params: Value) -> Command {
        Command::builder()
            .command_type(ty)
            .params(params.as_object().cloned().unwrap_or_default())
            .issuer("1")
            .authenticated_by("1")
            .host("localhost")
            .build()
    }

    struct Source {
        name: &'static str,
        fail: bool,
    }

    impl HandlerSource for Source {
        fn name(&self) -> &str {
            self.name
        }

        fn register(&self, handlers: &mut HandlerSet) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("source unavailable");
            }
            handlers
                .add(Arc::new(GreetHandler { greeting: "hi" }))
                .add(Arc::new(PingHandler));
            Ok(())
        }
    }

    #[test]
    fn duplicate_registration_keeps_the_first_handler() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(Arc::new(GreetHandler { greeting: "hello" }))
            .unwrap();

        let err = registry
            .register(Arc::new(GreetHandler { greeting: "bye" }))
            .unwrap_err();
        assert_eq!(err, RegistryError::AlreadyRegistered { command_type: "greet" });
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn first_registered_handler_stays_authoritative() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(Arc::new(GreetHandler { greeting: "hello" }))
            .unwrap();
        let _ = registry.register(Arc::new(GreetHandler { greeting: "bye" }));

        let validated = registry
            .validate(command("greet", json!({"name": "ada"})))
            .unwrap();
        let output = validated.run().await.unwrap();
        assert_eq!(output.result, Some(json!("hello, ada")));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let registry = HandlerRegistry::new();
        let err = registry.get("nope").unwrap_err();
        match err {
            GatewayError::CommandRejected { reason, .. } => {
                assert_eq!(reason, "Unknown command: nope")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn validate_replaces_params_with_normalized_values() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(Arc::new(GreetHandler { greeting: "hi" }))
            .unwrap();

        let validated = registry
            .validate(command("greet", json!({"name": "ada", "extra": 1})))
            .unwrap();
        assert_eq!(validated.command_type(), "greet");
        assert_eq!(validated.command().params().len(), 1);
        assert_eq!(validated.command().params().get("name"), Some(&json!("ada")));
    }

    #[test]
    fn validate_propagates_field_errors() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(Arc::new(GreetHandler { greeting: "hi" }))
            .unwrap();

        let err = registry.validate(command("greet", json!({}))).unwrap_err();
        assert_eq!(err.context().get("name").map(String::as_str), Some("required"));
    }

    #[test]
    fn failing_source_registers_nothing() {
        let mut registry = HandlerRegistry::new();
        assert!(!registry.register_source(&Source { name: "broken", fail: true }));
        assert!(registry.is_empty());

        assert!(registry.register_source(&Source { name: "core", fail: false }));
        assert_eq!(registry.registered_commands(), vec!["greet", "ping"]);
    }

    #[test]
    fn conflicting_source_is_skipped_entirely() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(PingHandler)).unwrap();

        assert!(!registry.register_source(&Source { name: "core", fail: false }));
        assert_eq!(registry.registered_commands(), vec!["ping"]);
        assert!(!registry.contains("greet"));
    }

    #[tokio::test]
    async fn panicking_handler_becomes_an_error() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(PingHandler)).unwrap();

        let validated = registry.validate(command("ping", json!({}))).unwrap();
        let err = validated.run().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
