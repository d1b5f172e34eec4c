//! One-shot commands: each opens a context, runs one operation and prints
//! the resulting cache.

use std::io::{self, Write};

use session_core::{
    codec, load_options, select_strategy_type, SessionError, SessionRecord, SessionStore,
    SessionStoreOptions, StorageConfig, StoreStrategy, StoreStrategyType,
};
use thiserror::Error;

use crate::sampling::SampleRateClassifier;

pub type HookStore = SessionStore<StoreStrategy, SampleRateClassifier>;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("No usable session backend under {0}")]
    NoBackend(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Output error: {0}")]
    Output(#[from] io::Error),
}

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: StorageConfig,
    pub product: String,
    pub sample_rate: f64,
    pub fallback: Option<bool>,
}

impl Context {
    fn strategy_type(&self) -> Result<(StoreStrategyType, SessionStoreOptions), HookError> {
        let mut options = load_options(&self.config.config_file());
        if let Some(fallback) = self.fallback {
            options.allow_fallback = fallback;
        }
        let strategy_type = select_strategy_type(&self.config, &options)
            .ok_or_else(|| HookError::NoBackend(self.config.root().display().to_string()))?;
        Ok((strategy_type, options))
    }

    pub fn open_store(&self) -> Result<HookStore, HookError> {
        let (strategy_type, options) = self.strategy_type()?;
        tracing::debug!(
            strategy = %strategy_type,
            product = %self.product,
            "Opening session store"
        );
        let storage = StoreStrategy::init(strategy_type, &self.config, &options);
        Ok(SessionStore::builder(
            storage,
            &self.product,
            SampleRateClassifier::new(self.sample_rate),
        )
        .options(options)
        .start()?)
    }
}

pub fn renew(ctx: &Context) -> Result<(), HookError> {
    let mut store = ctx.open_store()?;
    store.expand_or_renew_session();
    let record = store.session().clone();
    store.stop();
    print_record(&record, false)
}

pub fn expand(ctx: &Context) -> Result<(), HookError> {
    let mut store = ctx.open_store()?;
    store.expand_session();
    let record = store.session().clone();
    store.stop();
    print_record(&record, false)
}

pub fn show(ctx: &Context, json: bool) -> Result<(), HookError> {
    let mut store = ctx.open_store()?;
    let record = store.session().clone();
    store.stop();
    print_record(&record, json)
}

pub fn expire(ctx: &Context) -> Result<(), HookError> {
    let mut store = ctx.open_store()?;
    store.expire();
    store.stop();
    tracing::info!(product = %ctx.product, "Session expired");
    Ok(())
}

pub fn strategy(ctx: &Context) -> Result<(), HookError> {
    let (strategy_type, _) = ctx.strategy_type()?;
    writeln!(io::stdout(), "{strategy_type}")?;
    Ok(())
}

fn print_record(record: &SessionRecord, json: bool) -> Result<(), HookError> {
    let rendered = render_record(record, json)?;
    writeln!(io::stdout(), "{rendered}")?;
    Ok(())
}

fn render_record(record: &SessionRecord, json: bool) -> Result<String, HookError> {
    if json {
        Ok(serde_json::to_string_pretty(record)?)
    } else {
        Ok(codec::encode(record)?)
    }
}
