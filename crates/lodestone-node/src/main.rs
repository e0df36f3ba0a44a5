//! Lodestone demo harness.
//!
//! Spins up a three-replica cluster in one process, runs a scripted
//! two-client workload against it (create, write, cross-replica reads,
//! delete), then stops the leader to exercise re-election and proves the
//! cluster still takes writes.
//!
//! ```bash
//! lodestone --data-dir ./data
//! RUST_LOG=lodestone_raft=debug lodestone
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lodestone_bus::Bus;
use lodestone_client::Client;
use lodestone_raft::{ClusterConfig, Role, TimingConfig};
use lodestone_server::ReplicaHandle;
use lodestone_store::DirSink;
use lodestone_types::{ClientId, ReplicaId};

/// Lodestone - a small replicated file store.
#[derive(Parser)]
#[command(name = "lodestone")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory for persisted file blobs. A temporary directory is used
    /// when omitted.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log filter (overridden by RUST_LOG if set).
    #[arg(long, default_value = "info")]
    log: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log)),
        )
        .init();

    // Scratch directory for the persistence sink.
    let _scratch;
    let data_dir = match cli.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating data dir {}", dir.display()))?;
            dir
        }
        None => {
            let tmp = tempfile::tempdir().context("creating temporary data dir")?;
            let dir = tmp.path().to_path_buf();
            _scratch = tmp;
            dir
        }
    };
    println!("Persisting file blobs under {}", data_dir.display());

    // Cluster setup: one bus, three replicas, a shared sink keyed by
    // (filename, replica).
    let bus = Arc::new(Bus::new());
    let replica_ids: Vec<ReplicaId> = (1..=3).map(ReplicaId::new).collect();
    let cluster = ClusterConfig::new(replica_ids.clone());
    let timing = TimingConfig::default();
    let sink: Arc<dyn lodestone_store::FileSink> = Arc::new(DirSink::new(&data_dir));

    let replicas: Vec<ReplicaHandle> = replica_ids
        .iter()
        .map(|&id| {
            let sink = Arc::clone(&sink);
            ReplicaHandle::spawn(id, cluster.clone(), timing, Arc::clone(&bus), sink)
        })
        .collect();

    let initial_leader = &replicas[0];
    initial_leader.become_leader();
    println!("Initial leader is r{}", initial_leader.replica_id());

    // Let the followers hear a heartbeat before clients arrive.
    thread::sleep(Duration::from_secs(2));

    let client1 = Client::new(
        ClientId::new(1),
        ReplicaId::new(2),
        Arc::clone(&bus),
        timing.client_deadline,
    );
    let client2 = Client::new(
        ClientId::new(2),
        ReplicaId::new(3),
        Arc::clone(&bus),
        timing.client_deadline,
    );

    println!("\nClient 1 creating 'test.txt'");
    report_flag("create", client1.create_file("test.txt"));
    thread::sleep(Duration::from_secs(2));

    println!("\nClient 1 writing to 'test.txt'");
    report_flag("write", client1.write_file("test.txt", "Hello from Client 1!"));
    thread::sleep(Duration::from_secs(2));

    println!("\nClient 1 reading 'test.txt'");
    report_read(client1.read_file("test.txt"));

    println!("\nClient 2 reading 'test.txt'");
    report_read(client2.read_file("test.txt"));

    println!("\nClient 2 writing to 'test.txt'");
    report_flag("write", client2.write_file("test.txt", "Hello from Client 2!"));
    thread::sleep(Duration::from_secs(2));

    println!("\nClient 1 reading 'test.txt' after Client 2's update");
    report_read(client1.read_file("test.txt"));

    println!("\nClient 1 deleting 'test.txt'");
    report_flag("delete", client1.delete_file("test.txt"));
    thread::sleep(Duration::from_secs(2));

    println!("\nClient 2 attempting to read 'test.txt' after deletion");
    report_read(client2.read_file("test.txt"));

    // Simulate leader failure and watch the survivors elect.
    println!("\nSimulating failure of leader r{}...", initial_leader.replica_id());
    initial_leader.stop();

    let new_leader = await_new_leader(&replicas, initial_leader.replica_id());
    match new_leader {
        Some(id) => {
            println!("New leader elected: r{id}");
            thread::sleep(Duration::from_secs(1));

            println!("\nClient 2 writing to 'test.txt' after leader failure");
            report_flag("create", client2.create_file("test.txt"));
            report_flag(
                "write",
                client2.write_file("test.txt", "New content after leader failure"),
            );
            thread::sleep(Duration::from_secs(2));

            println!("\nClient 1 reading 'test.txt' after leader failure");
            report_read(client1.read_file("test.txt"));
        }
        None => println!("No new leader was elected after failure."),
    }

    for replica in &replicas {
        replica.stop();
    }
    Ok(())
}

/// Polls for a leader other than `failed`, within three election windows.
fn await_new_leader(replicas: &[ReplicaHandle], failed: ReplicaId) -> Option<ReplicaId> {
    let deadline = 3 * TimingConfig::default().election_timeout_max;
    let started = std::time::Instant::now();
    while started.elapsed() < deadline {
        for replica in replicas {
            if replica.replica_id() != failed && replica.role() == Role::Leader {
                return Some(replica.replica_id());
            }
        }
        thread::sleep(Duration::from_millis(100));
    }
    None
}

fn report_flag(operation: &str, result: Result<bool, lodestone_client::ClientError>) {
    match result {
        Ok(true) => println!("  {operation} succeeded"),
        Ok(false) => println!("  {operation} failed"),
        Err(err) => println!("  {err}"),
    }
}

fn report_read(result: Result<bytes::Bytes, lodestone_client::ClientError>) {
    match result {
        Ok(content) => println!("  content: {:?}", String::from_utf8_lossy(&content)),
        Err(err) => println!("  {err}"),
    }
}
