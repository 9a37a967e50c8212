//! Synapse 命令行
//!
//! ```text
//! synapse run "<scenario>" [--context <json>] [--session <id>] [--config <path>]
//! synapse tools [--config <path>]
//! synapse abandon <session_id> [--config <path>]
//! ```
//!
//! `run` 把事件逐行以 JSON 写到 stdout；遇到 clarify 事件时在 stderr 提问、从 stdin 读回答并续跑。
//! Ctrl+C 取消当前运行（仍会输出 summary）。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use synapse::config::load_config;
use synapse::core::RunContext;
use synapse::engine::{ClarifyAnswer, ResolutionRun, RunRequest};
use synapse::{build_resolver, observability, Resolver};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "synapse")]
#[command(about = "Synapse - last-mile disruption resolution engine", long_about = None)]
struct Cli {
    /// 额外的配置文件（叠加在 config/default.toml 之上）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 处置一个场景，事件逐行输出为 JSON
    Run {
        /// 场景描述（多个词会以空格拼接）
        #[arg(required = true, num_args = 1..)]
        scenario: Vec<String>,
        /// JSON 形式的初始 RunContext
        #[arg(long)]
        context: Option<String>,
        /// 指定运行 id
        #[arg(long)]
        session: Option<String>,
    },
    /// 输出工具目录
    Tools,
    /// 放弃一个暂停中的会话
    Abandon { session_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;
    let resolver = build_resolver(&cfg).await.context("Failed to build resolver")?;

    match cli.command {
        Command::Run {
            scenario,
            context,
            session,
        } => run(&resolver, scenario.join(" "), context, session).await,
        Command::Tools => {
            let catalog = resolver.invoker().catalog();
            println!("{}", serde_json::to_string_pretty(&catalog)?);
            Ok(())
        }
        Command::Abandon { session_id } => {
            resolver.abandon(&session_id).await?;
            println!("{}", serde_json::json!({"status": "deleted", "session_id": session_id}));
            Ok(())
        }
    }
}

async fn run(
    resolver: &Resolver,
    scenario: String,
    context: Option<String>,
    session: Option<String>,
) -> anyhow::Result<()> {
    let context = match &context {
        Some(raw) => serde_json::from_str::<RunContext>(raw).context("--context is not a valid run context")?,
        None => RunContext::default(),
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let mut req = RunRequest::new(scenario).with_context(context).with_cancel(cancel.clone());
    if let Some(id) = session {
        req = req.with_session_id(id);
    }
    let mut run = resolver.start(req)?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let Some(prompt) = drain(&mut run).await? else {
            return Ok(());
        };

        eprint!("{}", prompt.question.question);
        if !prompt.question.options.is_empty() {
            eprint!(" [{}]", prompt.question.options.join("/"));
        }
        eprint!(" > ");
        std::io::stderr().flush()?;

        let Some(line) = stdin.next_line().await? else {
            // stdin 已关闭：会话保持暂停，可稍后续跑或 abandon
            eprintln!("no answer given; session {} stays paused", prompt.session_id);
            return Ok(());
        };
        let answer = serde_json::from_str(line.trim()).unwrap_or_else(|_| serde_json::Value::String(line.trim().to_string()));
        run = resolver
            .continue_clarification(
                ClarifyAnswer {
                    session_id: prompt.session_id,
                    question_id: prompt.question.question_id,
                    answer,
                    expected_type: Some(prompt.question.expected_type),
                },
                Some(cancel.clone()),
            )
            .await?;
    }
}

/// 打印事件直到运行结束；以 clarify 结束时返回该问题
async fn drain(run: &mut ResolutionRun) -> anyhow::Result<Option<synapse::engine::ClarifyPrompt>> {
    let mut stdout = std::io::stdout();
    let mut last_prompt = None;
    while let Some(event) = run.next_event().await {
        writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
        stdout.flush()?;
        if let Some(prompt) = event.as_clarify() {
            last_prompt = Some(prompt.clone());
        }
    }
    Ok(last_prompt)
}
