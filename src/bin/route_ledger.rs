//! Minimal CLI around the route ledger validation core.
//!
//! Commands operate on the registry, topology and ledger files named by the
//! configuration (`--config <path>` or `$ROUTE_LEDGER_CONFIG`).

use route_ledger::sign::{
    decode_signature_base64, encode_public_key_base64, encode_signature_base64, load_signing_key,
    sign_digest, KeySource,
};
use route_ledger::{
    append_record, audit, compare_topologies, read_records, LedgerConfig, LedgerRecord,
    LedgerState, ParticipantRegistry, Rejection, Topology, TopologyStore, Transaction, TxHeader,
};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn print_help() {
    println!("Usage: route_ledger <command> [flags]");
    println!("  keygen --seed <seed|file>");
    println!("  register --as <asn> --seed <seed|file> [--config <path>]");
    println!("  sign --seed <seed|file> --as <asn> --prefix <p> --time <t>");
    println!("  announce --as <asn> --prefix <p> --time <t> --sources a,b --dests c,d");
    println!("           --signature <b64> [--bgp-time <t>] [--config <path>]");
    println!("  withdraw --as <asn> --prefix <p> --time <t> --signature <b64>");
    println!("           [--bgp-time <t>] [--config <path>]");
    println!("  bootstrap --updates <file> [--config <path>]");
    println!("  audit --updates <file> [--config <path>]");
    println!("  topology --prefix <p> [--config <path>]");
    println!("  records [--config <path>]");
}

/// `--flag value` pairs collected from the command tail.
struct Flags {
    values: HashMap<String, String>,
}

impl Flags {
    fn parse(args: Vec<String>, allowed: &[&str]) -> Self {
        let mut values = HashMap::new();
        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            if !allowed.contains(&arg.as_str()) {
                fatal(&format!("unknown argument: {arg}"));
            }
            let value = iter
                .next()
                .unwrap_or_else(|| fatal(&format!("{arg} expects a value")));
            values.insert(arg.trim_start_matches("--").to_string(), value);
        }
        Self { values }
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    fn require(&self, name: &str) -> &str {
        self.get(name)
            .unwrap_or_else(|| fatal(&format!("--{name} is required")))
    }

    fn require_u64(&self, name: &str) -> u64 {
        self.require(name)
            .parse::<u64>()
            .unwrap_or_else(|_| fatal(&format!("invalid --{name}")))
    }

    fn optional_u64(&self, name: &str) -> Option<u64> {
        self.get(name).map(|raw| {
            raw.parse::<u64>()
                .unwrap_or_else(|_| fatal(&format!("invalid --{name}")))
        })
    }

    fn list(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn config(&self) -> LedgerConfig {
        let path = self.get("config").map(PathBuf::from);
        LedgerConfig::load(path.as_deref())
            .unwrap_or_else(|err| fatal(&format!("failed to load config: {err}")))
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mut args = env::args().skip(1);
    let command = args.next();
    let tail: Vec<String> = args.collect();
    match command.as_deref() {
        Some("keygen") => cmd_keygen(tail),
        Some("register") => cmd_register(tail),
        Some("sign") => cmd_sign(tail),
        Some("announce") => cmd_announce(tail),
        Some("withdraw") => cmd_withdraw(tail),
        Some("bootstrap") => cmd_bootstrap(tail),
        Some("audit") => cmd_audit(tail),
        Some("topology") => cmd_topology(tail),
        Some("records") => cmd_records(tail),
        Some("-h") | Some("--help") | None => print_help(),
        Some(other) => {
            print_help();
            fatal(&format!("unknown command: {other}"));
        }
    }
}

fn cmd_keygen(args: Vec<String>) {
    let flags = Flags::parse(args, &["--seed"]);
    let source = KeySource::from_spec(flags.get("seed"));
    let key = load_signing_key(&source)
        .unwrap_or_else(|err| fatal(&format!("failed to derive key: {err}")));
    println!(
        "public_key_b64: {}",
        encode_public_key_base64(&key.verifying_key())
    );
}

fn cmd_register(args: Vec<String>) {
    let flags = Flags::parse(args, &["--as", "--seed", "--config"]);
    let config = flags.config();
    let asn = flags.require("as");
    let key = load_signing_key(&KeySource::from_spec(Some(flags.require("seed"))))
        .unwrap_or_else(|err| fatal(&format!("failed to derive key: {err}")));
    let registry = ParticipantRegistry::load(&config.registry_path)
        .unwrap_or_else(|err| fatal(&format!("failed to load registry: {err}")));
    registry
        .register(asn, key.verifying_key())
        .unwrap_or_else(|err| fatal(&format!("register failed: {err}")));
    registry
        .save(&config.registry_path)
        .unwrap_or_else(|err| fatal(&format!("failed to save registry: {err}")));
    println!("registered {asn} ({} participants)", registry.len());
}

fn cmd_sign(args: Vec<String>) {
    let flags = Flags::parse(args, &["--seed", "--as", "--prefix", "--time"]);
    let key = load_signing_key(&KeySource::from_spec(Some(flags.require("seed"))))
        .unwrap_or_else(|err| fatal(&format!("failed to derive key: {err}")));
    let header = TxHeader {
        prefix: flags.require("prefix").to_string(),
        as_source: flags.require("as").to_string(),
        time: flags.require_u64("time"),
        bgp_timestamp: None,
    };
    let txid = header.hash();
    println!("txid: {txid}");
    println!(
        "signature_b64: {}",
        encode_signature_base64(&sign_digest(&key, &txid))
    );
}

fn cmd_announce(args: Vec<String>) {
    let flags = Flags::parse(
        args,
        &[
            "--as",
            "--prefix",
            "--time",
            "--sources",
            "--dests",
            "--signature",
            "--bgp-time",
            "--config",
        ],
    );
    let tx = Transaction::announce(
        flags.require("prefix"),
        flags.optional_u64("bgp-time"),
        flags.require("as"),
        flags.list("sources"),
        flags.list("dests"),
        flags.require_u64("time"),
    );
    submit(&flags, tx);
}

fn cmd_withdraw(args: Vec<String>) {
    let flags = Flags::parse(
        args,
        &[
            "--as",
            "--prefix",
            "--time",
            "--signature",
            "--bgp-time",
            "--config",
        ],
    );
    let tx = Transaction::withdraw(
        flags.require("prefix"),
        flags.require("as"),
        flags.require_u64("time"),
        flags.optional_u64("bgp-time"),
    );
    submit(&flags, tx);
}

fn submit(flags: &Flags, mut tx: Transaction) {
    let config = flags.config();
    let signature = decode_signature_base64(flags.require("signature"))
        .unwrap_or_else(|err| fatal(&format!("invalid --signature: {err}")));
    tx.sign(signature);

    let state = LedgerState::from_config(&config)
        .unwrap_or_else(|err| fatal(&format!("failed to load ledger state: {err}")));
    let outcome: Result<LedgerRecord, Rejection> = if config.serialize_commits {
        state.admit(tx)
    } else {
        state.finalize(tx).and_then(|record| {
            state.topologies().commit(&record)?;
            Ok(record)
        })
    };
    let record = outcome.unwrap_or_else(|rejection| fatal(&format!("rejected: {rejection}")));

    // The record goes first: topology edges on disk must always be backed by
    // a ledger entry.
    append_record(&config.ledger_path, &record)
        .unwrap_or_else(|err| fatal(&format!("failed to append ledger record: {err}")));
    state
        .persist_topologies(&config)
        .unwrap_or_else(|err| fatal(&format!("failed to persist topology: {err}")));
    info!(txid = %record.txid, path = %config.ledger_path.display(), "record appended");
    let json = serde_json::to_string_pretty(&record)
        .unwrap_or_else(|err| fatal(&format!("failed to encode record: {err}")));
    println!("{json}");
}

fn cmd_bootstrap(args: Vec<String>) {
    let flags = Flags::parse(args, &["--updates", "--config"]);
    let config = flags.config();
    let rebuilt = audit::rebuild_from_file(&PathBuf::from(flags.require("updates")))
        .unwrap_or_else(|err| fatal(&format!("failed to parse updates: {err}")));
    let store = TopologyStore::load(&config.topology_path)
        .unwrap_or_else(|err| fatal(&format!("failed to load topology: {err}")));
    for (prefix, topology) in &rebuilt {
        let mut merged: Topology = store.snapshot(prefix);
        for [src, dst] in topology.edge_pairs() {
            merged.add_edge(&src, &dst);
        }
        store.replace(prefix, merged);
    }
    store
        .save(&config.topology_path)
        .unwrap_or_else(|err| fatal(&format!("failed to save topology: {err}")));
    println!(
        "seeded {} prefixes into {}",
        rebuilt.len(),
        config.topology_path.display()
    );
}

fn cmd_audit(args: Vec<String>) {
    let flags = Flags::parse(args, &["--updates", "--config"]);
    let config = flags.config();
    let rebuilt = audit::rebuild_from_file(&PathBuf::from(flags.require("updates")))
        .unwrap_or_else(|err| fatal(&format!("failed to parse updates: {err}")));
    let store = TopologyStore::load(&config.topology_path)
        .unwrap_or_else(|err| fatal(&format!("failed to load topology: {err}")));
    let report = compare_topologies(&rebuilt, &store.export());
    for mismatch in &report.mismatches {
        eprintln!("mismatch: {mismatch:?}");
    }
    println!("{}", report.is_consistent());
}

fn cmd_topology(args: Vec<String>) {
    let flags = Flags::parse(args, &["--prefix", "--config"]);
    let config = flags.config();
    let store = TopologyStore::load(&config.topology_path)
        .unwrap_or_else(|err| fatal(&format!("failed to load topology: {err}")));
    let edges = store.edge_pairs(flags.require("prefix"));
    let json = serde_json::to_string(&edges)
        .unwrap_or_else(|err| fatal(&format!("failed to encode edges: {err}")));
    println!("{json}");
}

fn cmd_records(args: Vec<String>) {
    let flags = Flags::parse(args, &["--config"]);
    let config = flags.config();
    let records = read_records(&config.ledger_path)
        .unwrap_or_else(|err| fatal(&format!("failed to read ledger: {err}")));
    for record in records {
        println!(
            "{} {} in={} out={}",
            record.txid,
            record.kind,
            record.input.len(),
            record.output.len()
        );
    }
}
