mod config;
mod pool;
mod session;

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sightline_engine::Dispatcher;

use crate::config::ServerArgs;
use crate::pool::DispatchPool;
use crate::session::{serve_connection, SessionRegistry};

fn main() {
    match run() {
        Ok(()) => {}
        Err(err) => {
            eprintln!("sightlined error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = ServerArgs::parse();
    let registry = Arc::new(args.build_registry()?);
    info!(backends = ?registry.loaded(), "model registry ready");

    let mut dispatcher = Dispatcher::new(
        Arc::clone(&registry),
        Box::new(args.router()),
        args.adapter_settings(),
    );
    if let Some(refiner) = args.text_refiner() {
        dispatcher = dispatcher.with_text_refiner(Box::new(refiner));
    }
    let dispatcher = Arc::new(dispatcher);

    let sessions = Arc::new(SessionRegistry::new());
    let pool = DispatchPool::new(args.workers, Arc::clone(&sessions), {
        let dispatcher = Arc::clone(&dispatcher);
        move |raw: &str| dispatcher.handle(raw)
    });

    let listener = TcpListener::bind(&args.bind)
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(bind = %args.bind, workers = args.workers, "listening for WebSocket clients");

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };
        let sessions = Arc::clone(&sessions);
        let queue = pool.queue();
        thread::spawn(move || {
            if let Err(err) = serve_connection(stream, &sessions, &queue) {
                warn!(error = %err, "connection ended with error");
            }
        });
    }
    Ok(())
}
