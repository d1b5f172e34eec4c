//! Long-running context: keeps polling the shared record and reports
//! renewals and expirations as they are observed.

use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};

use crate::commands::{Context, HookError};

const MIN_SLEEP_MS: i64 = 10;

pub fn run(ctx: &Context, ticks: Option<u64>) -> Result<(), HookError> {
    let mut store = ctx.open_store()?;

    let product = ctx.product.clone();
    store.renewed().subscribe(move |_| {
        tracing::info!(product = %product, "Session renewed");
        println!("{} renewed", timestamp());
    });
    let product = ctx.product.clone();
    store.expired().subscribe(move |_| {
        tracing::info!(product = %product, "Session expired");
        println!("{} expired", timestamp());
    });

    tracing::info!(
        product = %ctx.product,
        strategy = %store.storage().strategy_type(),
        ticks = ?ticks,
        "Watching session"
    );

    let mut polled = 0u64;
    while ticks.map_or(true, |limit| polled < limit) {
        sleep_until(store.next_deadline());
        store.poll();
        polled += 1;
    }

    store.stop();
    tracing::debug!(polled, "Watch finished");
    Ok(())
}

fn sleep_until(deadline: Option<i64>) {
    let now = Utc::now().timestamp_millis();
    let wait = deadline.map_or(MIN_SLEEP_MS, |at| (at - now).max(MIN_SLEEP_MS));
    thread::sleep(Duration::from_millis(wait as u64));
}

fn timestamp() -> String {
    let now: DateTime<Local> = Local::now();
    now.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}
