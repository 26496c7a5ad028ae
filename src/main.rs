use clap::Parser;
use evagent::{CancellationToken, Config, OutputMode, Profiler};
use std::time::Duration;

/// Runs the profiler against this process and prints every profile to stdout.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Stop after SECS seconds instead of waiting for Ctrl+C.
    #[arg(long, value_name = "SECS", num_args = 0..=1, default_missing_value = "6")]
    demo: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    colog::init();

    log::info!("Starting evagent {}", evagent::VERSION);

    let mut config = Config {
        service_name: "evagent-demo".into(),
        sample_interval: Duration::from_secs(5),
        profile_duration: Duration::from_secs(2),
        enable_cpu: true,
        enable_memory: true,
        enable_custom: true,
        output: OutputMode::Stdout,
        ..Config::default()
    };
    config.tags.insert("env".into(), "testing".into());
    config.tags.insert("version".into(), evagent::VERSION.into());

    let profiler = Profiler::new(config)?;
    let ctx = CancellationToken::new();
    profiler.start(&ctx).await?;

    let workload = {
        let ctx = ctx.clone();
        let sink = profiler.span_sink().cloned();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(250));
            while !ctx.is_cancelled() {
                tick.tick().await;
                let span = evagent::start_span(sink.as_ref(), "demo-work", [("kind", "busy-loop")]);
                let data: Vec<u64> = (0..200_000u64).map(|i| i * i).collect();
                log::debug!("workload produced {} values", data.len());
                span.end();
            }
        })
    };

    match args.demo {
        Some(secs) => {
            log::info!("Running in demo mode for {} seconds", secs);
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }
        None => {
            log::info!("Press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;
        }
    }

    ctx.cancel();
    profiler.stop().await;
    workload.await?;

    log::info!("Profiler stopped");
    Ok(())
}
