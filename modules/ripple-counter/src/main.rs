use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ripple_counter::counter::{initial_state, step_action, CountInfo, Increment};
use ripple_store::{middleware, Context, Store, StoreSettings};

/// Apply counter steps through a ripple store and print every commit.
#[derive(Parser, Debug)]
#[command(name = "ripple-counter")]
struct Args {
    /// Signed steps, applied in order (e.g. `5 -2 4`).
    #[arg(allow_negative_numbers = true)]
    steps: Vec<i64>,

    /// Also dispatch a negative increment to show a rejected update.
    #[arg(long)]
    invalid: bool,

    /// Number of subscribers listening for commits.
    #[arg(long, default_value_t = 1)]
    subscribers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ripple=info".parse()?))
        .init();

    let args = Args::parse();
    let settings = StoreSettings::from_env()?;

    let store = Store::builder(initial_state())
        .settings(settings)
        .middleware(middleware::logging())
        .build();

    let mut listeners = Vec::new();
    for id in 0..args.subscribers {
        let (subscription, mut rx) = store.subscribe_channel(settings.notify_capacity).await?;
        listeners.push(tokio::spawn(async move {
            let _subscription = subscription;
            while let Some(store) = rx.recv().await {
                let mut info = CountInfo::default();
                if store.select(&mut info).await.is_err() {
                    break;
                }
                println!(
                    "[subscriber {id}] count = {} ({} steps, positive: {})",
                    info.value, info.steps, info.is_positive
                );
            }
        }));
    }

    let ctx = Context::new();
    for step in &args.steps {
        store.dispatch(&ctx, step_action(*step)).await?;
    }

    if args.invalid {
        match store.dispatch_action(Increment(-1)).await {
            Ok(()) => warn!("Negative increment was unexpectedly accepted"),
            Err(err) => info!(error = %err, "Negative increment rejected, state unchanged"),
        }
    }

    let mut info = CountInfo::default();
    store.select(&mut info).await?;
    println!(
        "final count = {} after {} steps (negative: {})",
        info.value,
        info.steps,
        info.is_negative()
    );

    // Once the last notification is consumed the store winds down and the
    // subscriber channels close.
    drop(store);
    for listener in listeners {
        listener.await?;
    }
    Ok(())
}
