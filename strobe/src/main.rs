//! Strobe entry point
//!
//! A thin driver over the library: load the eBPF backend, wire the
//! symbolizers into a [`Profiler`], drain sample batches until Ctrl+C or
//! the duration limit, then hand everything to the chosen exporter.
//!
//! Attaching perf events requires root (or equivalent perf-event
//! permissions), and the probe object must exist; build it first with
//! `cargo xtask build-ebpf --release`.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{after, bounded, never, select};
use log::warn;
use prost::Message;
use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use strobe::cli::{Args, Format};
use strobe::domain::{Pid, Sample};
use strobe::export::{
    build_folded_stacks, build_otlp_profile, build_pprof_profile, write_folded_stacks,
    write_profile_gzip, StackSelection,
};
use strobe::profiling::{EbpfBackend, Profiler};
use strobe::symbolization::{KernelSymbolizer, Symbolize, UserSymbolizer};

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let backend = match &args.bpf_object {
        Some(path) => EbpfBackend::load_from(path),
        None => EbpfBackend::load(),
    }
    .context("failed to load the eBPF probe (build it with `cargo xtask build-ebpf --release`)")?;

    let target = args.pid.map(Pid);
    if target.is_none() {
        warn!(
            "no --pid given: sampling system-wide; user stacks of other \
             processes will mostly resolve to skipped frames"
        );
    }

    // With no target, symbolize user frames against our own process; frames
    // from foreign address spaces fail region lookup and are skipped.
    let symbolize_pid = target.unwrap_or(Pid(std::process::id() as i32));
    let user_sym: Box<dyn Symbolize + Send> = Box::new(UserSymbolizer::for_pid(symbolize_pid));
    let kernel_sym: Box<dyn Symbolize + Send> = match &args.vmlinux {
        Some(path) => Box::new(KernelSymbolizer::with_vmlinux(path)),
        None => Box::new(KernelSymbolizer::new()),
    };

    let profiler = Profiler::new(
        target,
        args.sample_hz,
        Duration::from_millis(args.interval_ms),
        Arc::new(backend),
        user_sym,
        kernel_sym,
    )?;

    profiler.start().context("failed to start profiler")?;
    println!("🔬 strobe v{}", env!("CARGO_PKG_VERSION"));
    match target {
        Some(pid) => println!("   target: {pid}"),
        None => println!("   target: system-wide"),
    }
    println!("   sampling: {} Hz, collecting every {} ms", args.sample_hz, args.interval_ms);
    if args.duration > 0 {
        println!("   duration: {}s", args.duration);
    } else {
        println!("   press Ctrl+C to stop");
    }

    let samples_rx = profiler.samples();

    let (sig_tx, sig_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = sig_tx.try_send(());
    })
    .context("failed to install Ctrl+C handler")?;

    let deadline_rx = if args.duration > 0 {
        after(Duration::from_secs(args.duration))
    } else {
        never()
    };

    let mut collected: Vec<Sample> = Vec::new();
    loop {
        select! {
            recv(samples_rx) -> batch => match batch {
                Ok(batch) => collected.extend(batch),
                Err(_) => break, // channel closed, collector is gone
            },
            recv(sig_rx) -> _ => {
                println!("\n✓ interrupted, stopping");
                break;
            }
            recv(deadline_rx) -> _ => {
                println!("\n✓ duration limit reached, stopping");
                break;
            }
        }
    }

    if let Err(e) = profiler.stop() {
        warn!("stopping profiler: {e}");
    }
    // Drain anything the collector published while we were shutting down.
    while let Ok(batch) = samples_rx.try_recv() {
        collected.extend(batch);
    }

    println!("   collected {} samples", collected.len());

    match args.format {
        Format::Folded => {
            let agg = build_folded_stacks(&collected, StackSelection::Both);
            let mut writer = BufWriter::new(
                File::create(&args.output).context("failed to create output file")?,
            );
            write_folded_stacks(&agg, &mut writer)?;
        }
        Format::Pprof => {
            let profile = build_pprof_profile(&collected, "samples", "count");
            let writer = BufWriter::new(
                File::create(&args.output).context("failed to create output file")?,
            );
            write_profile_gzip(&profile, writer)?;
        }
        Format::Otlp => {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64;
            let data = build_otlp_profile(&collected, now);
            std::fs::write(&args.output, data.encode_to_vec())
                .context("failed to write output file")?;
        }
    }

    println!("   ✓ wrote {}", args.output.display());
    Ok(())
}
