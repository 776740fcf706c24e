//! Reel - 多阶段内容制作编排器
//!
//! 用法：`reel [--config path] [--aspect 9:16] [--voice warm] <topic or source URL...>`
//! 入口：初始化日志、加载配置并装配 Studio，运行一次制作，最后打印 JSON 报告。

use anyhow::Context;
use clap::Parser;
use reel::cli::Cli;
use reel::core::studio_builder;
use reel::react::progress_channel;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    reel::observability::init();

    let cli = Cli::parse();
    let preferences = cli.preferences();
    if !preferences.is_empty() {
        tracing::info!(?preferences, "user preferences");
    }
    let cancel = CancellationToken::new();
    let (progress, mut events) = progress_channel();

    let studio = studio_builder(cli.config.clone())
        .with_preferences(preferences)
        .with_progress(progress)
        .with_cancel_token(cancel.clone())
        .build()
        .context("Failed to build studio")?;

    let printer = tokio::spawn(async move {
        while let Some(ev) = events.recv().await {
            let pct = ev
                .overall_percent
                .map(|p| format!("{p:>3}%"))
                .unwrap_or_else(|| "    ".to_string());
            eprintln!("[{pct}] {:<10} {}", ev.stage, ev.message);
        }
    });

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling at the next iteration");
            ctrl_c.cancel();
        }
    });

    let result = studio.supervisor.run(&cli.request_text()).await;
    drop(studio);
    let _ = printer.await;

    let report = result.context("Production failed")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize report")?
    );
    Ok(())
}
