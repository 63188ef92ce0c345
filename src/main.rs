//! dirdiff - compare two directory trees, locally or over SSH
//!
//! Exit codes: 0 identical, 1 divergent, 3 A is a subset of B, 4 B is a
//! subset of A, 2 on error, 130 when interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::tty::IsTty;
use std::io::{self, BufReader};
use std::sync::Arc;
use std::time::Instant;

use dirdiff::cancel::{CancelToken, Interrupted};
use dirdiff::cli::Args;
use dirdiff::compare::compare;
use dirdiff::logger::{build_logger, Logger, NoopLogger, StderrLogger};
use dirdiff::net;
use dirdiff::node::create_node;
use dirdiff::outcome::{Summary, Verdict, EXIT_ERROR, EXIT_INTERRUPTED};
use dirdiff::progress::Progress;
use dirdiff::render;

fn main() {
    let argv: Vec<String> = std::env::args().collect();
    let args = Args::parse();

    if args.agent {
        if let Err(e) = run_agent(args.verbose) {
            eprintln!("Error: {:#}", e);
            std::process::exit(EXIT_ERROR);
        }
        return;
    }

    let cancel = CancelToken::new();
    let code = match install_interrupt_handler(&cancel).and_then(|_| run(&args, &argv, &cancel)) {
        Ok(verdict) => verdict.exit_code(),
        Err(e) if e.downcast_ref::<Interrupted>().is_some() => {
            if !args.quiet {
                eprintln!("Interrupted.");
            }
            EXIT_INTERRUPTED
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_ERROR
        }
    };
    std::process::exit(code);
}

/// First Ctrl-C asks workers to stop; a second one exits immediately
fn install_interrupt_handler(cancel: &CancelToken) -> Result<()> {
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        if token.is_cancelled() {
            std::process::exit(EXIT_INTERRUPTED);
        }
        token.cancel();
        eprintln!("\nInterrupted, stopping workers (Ctrl-C again to quit now)...");
    })
    .context("Error setting Ctrl-C handler")
}

/// Serve RPC requests on stdin/stdout until the client hangs up
fn run_agent(verbose: bool) -> Result<()> {
    let logger: Arc<dyn Logger> = if verbose {
        Arc::new(StderrLogger)
    } else {
        Arc::new(NoopLogger)
    };
    net::serve(BufReader::new(io::stdin()), io::stdout(), &*logger)
}

fn run(args: &Args, argv: &[String], cancel: &CancelToken) -> Result<Verdict> {
    let cfg = args.resolve(argv)?;
    let logger = build_logger(cfg.verbose, cfg.log_file.as_deref())?;
    logger.start(&cfg.a.to_string(), &cfg.b.to_string());

    if cfg.a.same_place(&cfg.b) {
        if cfg.verbose {
            eprintln!("Directories are identical (same path: {})", cfg.a);
        }
        return Ok(Verdict::Identical);
    }

    let started = Instant::now();
    let mut a = create_node(&cfg.a, &cfg.remote_a, cancel, logger.clone())
        .with_context(|| format!("opening {}", cfg.a))?;
    let mut b = match create_node(&cfg.b, &cfg.remote_b, cancel, logger.clone()) {
        Ok(b) => b,
        Err(e) => {
            a.abort();
            return Err(e.context(format!("opening {}", cfg.b)));
        }
    };

    let progress = Progress::new(cfg.progress);
    let result = compare(&*a, &*b, &cfg.compare, cancel, &progress, &*logger);
    progress.finish();

    if cancel.is_cancelled() {
        // in-flight requests are abandoned, not drained
        a.abort();
        b.abort();
        result?;
        return Err(Interrupted.into());
    }

    let closed_a = a.close();
    let closed_b = b.close();
    let items = result?;
    closed_a.with_context(|| format!("closing {}", cfg.a))?;
    closed_b.with_context(|| format!("closing {}", cfg.b))?;
    logger.done(items.len(), started.elapsed().as_secs_f64());

    let summary = Summary::from_items(&items);
    let verdict = summary.verdict();
    if !cfg.quiet {
        let color = cfg.color && io::stdout().is_tty();
        render::write_items(&mut io::stdout().lock(), &items, color)?;
    }
    if cfg.verbose {
        let mut err = io::stderr().lock();
        render::write_summary(&mut err, &summary, verdict, cfg.compare.show_all)?;
    }
    Ok(verdict)
}
