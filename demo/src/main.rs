use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use gateway_application::{
    Backpressure, CommandHandler, CommandQuery, CommandRunner, FieldKind, Gateway, GatewayConfig,
    HandlerOutput, HandlerRegistry, HandlerSet, HandlerSource, ParamSchema, RunnerConfig,
};
use gateway_domain::command::Command;
use gateway_domain::error::GatewayResult;
use gateway_domain::persist::{CommandStore, InMemoryCommandStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackpressureArg {
    Reject,
    Wait,
}

impl From<BackpressureArg> for Backpressure {
    fn from(value: BackpressureArg) -> Self {
        match value {
            BackpressureArg::Reject => Backpressure::Reject,
            BackpressureArg::Wait => Backpressure::Wait,
        }
    }
}

/// 命令网关演示
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// 以只读模式启动
    #[arg(long, env = "GATEWAY_READ_ONLY")]
    read_only: bool,

    #[arg(long, env = "GATEWAY_WORKERS", default_value_t = 4)]
    workers: usize,

    #[arg(long, env = "GATEWAY_QUEUE_CAPACITY", default_value_t = 1024)]
    queue_capacity: usize,

    #[arg(long, env = "GATEWAY_BACKPRESSURE", value_enum, default_value = "reject")]
    backpressure: BackpressureArg,

    /// SQLite 连接串，例如 `sqlite://gateway.db`；缺省使用内存存储
    #[arg(long, env = "GATEWAY_DATABASE_URL")]
    database_url: Option<String>,

    /// 输出 JSON 结构化日志
    #[arg(long, env = "GATEWAY_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            read_only: self.read_only,
            runner: RunnerConfig {
                workers: self.workers,
                queue_capacity: self.queue_capacity,
                backpressure: self.backpressure.into(),
            },
        }
    }
}

fn init_tracing(json: bool) {
    // `gateway` 前缀同时覆盖 gateway_domain 与 gateway_application
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gateway=info,demo=info"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EchoParams {
    foo: i64,
    bar: i64,
    baz: i64,
}

struct Echo;

#[async_trait]
impl CommandHandler for Echo {
    const COMMAND_TYPE: &'static str = "echo";
    type Params = EchoParams;

    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .required("foo", FieldKind::Integer)
            .required("bar", FieldKind::Integer)
            .required("baz", FieldKind::Integer)
    }

    async fn run(&self, command: &Command, params: EchoParams) -> anyhow::Result<HandlerOutput> {
        tracing::info!(
            issuer = command.issuer(),
            sum = params.foo + params.bar + params.baz,
            "echo"
        );
        Ok(HandlerOutput::empty())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct NoteParams {
    text: String,
    #[serde(default)]
    pinned: Option<bool>,
}

#[derive(Default)]
struct CreateNote {
    next: AtomicU64,
}

#[async_trait]
impl CommandHandler for CreateNote {
    const COMMAND_TYPE: &'static str = "note.create";
    type Params = NoteParams;

    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .required("text", FieldKind::String)
            .optional("pinned", FieldKind::Boolean)
    }

    fn authorize(&self, command: &Command) -> GatewayResult<()> {
        if command.authenticated_by().is_empty() {
            return Err(gateway_domain::error::GatewayError::not_authorized(
                "Anonymous issuers may not create notes.",
            ));
        }
        Ok(())
    }

    async fn run(&self, _command: &Command, params: NoteParams) -> anyhow::Result<HandlerOutput> {
        // 模拟较慢的下游写入
        tokio::time::sleep(Duration::from_millis(100)).await;
        let id = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(HandlerOutput {
            ident: Some(format!("note-{id}")),
            result: Some(json!({"text": params.text, "pinned": params.pinned.unwrap_or(false)})),
            created: true,
        })
    }
}

struct DemoHandlers;

impl HandlerSource for DemoHandlers {
    fn name(&self) -> &str {
        "demo"
    }

    fn register(&self, handlers: &mut HandlerSet) -> anyhow::Result<()> {
        handlers
            .add(Arc::new(Echo))
            .add(Arc::new(CreateNote::default()));
        Ok(())
    }
}

async fn open_store(url: Option<&str>) -> anyhow::Result<Arc<dyn CommandStore>> {
    match url {
        None => Ok(Arc::new(InMemoryCommandStore::new())),
        #[cfg(feature = "sqlite")]
        Some(url) => {
            let store = gateway_domain::persist::SqliteCommandStore::connect(url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        Some(_) => anyhow::bail!("GATEWAY_DATABASE_URL requires the `sqlite` feature"),
    }
}

fn submission(ty: &str, params: serde_json::Value, asynchronous: bool) -> anyhow::Result<Command> {
    let serde_json::Value::Object(params) = params else {
        anyhow::bail!("command params must be a JSON object");
    };
    Ok(Command::builder()
        .command_type(ty)
        .params(params)
        .asynchronous(asynchronous)
        .issuer("1")
        .authenticated_by("1")
        .host("127.0.0.1")
        .build())
}

async fn issue(gateway: &Gateway, command: Command) -> anyhow::Result<()> {
    let command_type = command.command_type().to_string();
    let rendered = match gateway.issue(command).await {
        Ok(res) => serde_json::to_value(&res)?,
        Err(err) => json!({
            "error": true,
            "kind": err.kind(),
            "reason": err.reason(),
            "context": err.context(),
        }),
    };
    println!("{command_type}: {rendered}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);
    let config = args.gateway_config();

    let mut registry = HandlerRegistry::new();
    if !registry.register_source(&DemoHandlers) {
        anyhow::bail!("failed to register demo handlers");
    }
    tracing::info!(commands = ?registry.registered_commands(), "handlers registered");

    let store = open_store(args.database_url.as_deref()).await?;
    let (runner, workers) = CommandRunner::start(config.runner);
    let gateway = Gateway::builder()
        .registry(registry)
        .store(store)
        .runner(runner)
        .read_only(config.read_only)
        .build();

    issue(&gateway, submission("echo", json!({"foo": 1, "bar": "2", "baz": 3}), false)?).await?;
    issue(&gateway, submission("echo", json!({"foo": 1, "baz": 3}), false)?).await?;
    issue(&gateway, submission("note.create", json!({"text": "hello"}), false)?).await?;
    issue(&gateway, submission("note.create", json!({"text": "later", "pinned": "true"}), true)?).await?;
    issue(&gateway, submission("unknown", json!({}), false)?).await?;

    // 等待异步命令完成
    tokio::time::sleep(Duration::from_millis(300)).await;

    for record in gateway.get_commands(CommandQuery::default()).await? {
        println!("{}", serde_json::to_string(&record)?);
    }

    workers.shutdown();
    workers.join().await;
    Ok(())
}
