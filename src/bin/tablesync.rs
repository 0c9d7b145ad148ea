use std::path::PathBuf;
use tablesync::acl::TableAcl;
use tablesync::catalog::types::DataEtag;
use tablesync::checkpoint::list_checkpoints;
use tablesync::checkpoint::loader::{load_checkpoint, verify_checkpoint};
use tablesync::storage::DatastoreSnapshot;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Err("missing command".into());
    }
    match args[1].as_str() {
        "inspect" => cmd_inspect(&args[2..]),
        "verify" => cmd_verify(&args[2..]),
        "dump" => match args.get(2).map(String::as_str) {
            Some("rows") => cmd_dump_rows(&args[3..]),
            Some("acls") => cmd_dump_acls(&args[3..]),
            Some(other) => Err(format!("unknown dump command: {other}")),
            None => Err("missing dump subcommand".into()),
        },
        other => {
            print_usage();
            Err(format!("unknown top-level command: {other}"))
        }
    }
}

/// One line per checkpoint: sequence, tables, rows, sha256, file.
fn cmd_inspect(args: &[String]) -> Result<(), String> {
    let dir = PathBuf::from(parse_flag_value(args, "--dir").ok_or("--dir is required")?);
    let found = list_checkpoints(&dir).map_err(|e| format!("list {}: {e}", dir.display()))?;
    if found.is_empty() {
        println!("no checkpoints in {}", dir.display());
        return Ok(());
    }
    for (seq, path) in found {
        match verify_checkpoint(&path) {
            Ok(meta) => println!(
                "{}\t{}\t{}\t{}\t{}",
                meta.seq, meta.tables, meta.rows, meta.sha256_hex, meta.filename
            ),
            Err(err) => println!("{seq}\tINVALID\t{err}\t{}", path.display()),
        }
    }
    Ok(())
}

fn cmd_verify(args: &[String]) -> Result<(), String> {
    let dir = PathBuf::from(parse_flag_value(args, "--dir").ok_or("--dir is required")?);
    let found = list_checkpoints(&dir).map_err(|e| format!("list {}: {e}", dir.display()))?;
    let mut failures = 0usize;
    for (_, path) in &found {
        if let Err(err) = verify_checkpoint(path) {
            failures += 1;
            eprintln!("{}: {err}", path.display());
        }
    }
    if failures > 0 {
        return Err(format!("{failures} of {} checkpoints failed", found.len()));
    }
    println!("ok: {} checkpoints verified", found.len());
    Ok(())
}

/// Rows of one table from the newest checkpoint as JSON lines, tombstones
/// included, optionally only those changed after `--since`.
fn cmd_dump_rows(args: &[String]) -> Result<(), String> {
    let table_id = parse_flag_value(args, "--table").ok_or("--table is required")?;
    let since = parse_flag_value(args, "--since")
        .map(|s| s.parse::<DataEtag>().map_err(|e| e.to_string()))
        .transpose()?;
    let snapshot = load_newest(args)?;
    let table = snapshot
        .tables
        .iter()
        .find(|t| t.entry.table_id == table_id)
        .ok_or_else(|| format!("table '{table_id}' not in checkpoint"))?;
    for row in table.rows.values() {
        if since.is_some_and(|s| row.data_etag_at_modification <= s) {
            continue;
        }
        let line = serde_json::to_string(row).map_err(|e| e.to_string())?;
        println!("{line}");
    }
    Ok(())
}

fn cmd_dump_acls(args: &[String]) -> Result<(), String> {
    let table_id = parse_flag_value(args, "--table").ok_or("--table is required")?;
    let snapshot = load_newest(args)?;
    let table = snapshot
        .tables
        .iter()
        .find(|t| t.entry.table_id == table_id)
        .ok_or_else(|| format!("table '{table_id}' not in checkpoint"))?;
    let acls: Vec<TableAcl> = table
        .acls
        .iter()
        .map(|(scope, role)| TableAcl {
            table_id: table_id.clone(),
            scope: scope.clone(),
            role: *role,
        })
        .collect();
    let out = serde_json::to_string_pretty(&acls).map_err(|e| e.to_string())?;
    println!("{out}");
    Ok(())
}

fn load_newest(args: &[String]) -> Result<DatastoreSnapshot, String> {
    let dir = PathBuf::from(parse_flag_value(args, "--dir").ok_or("--dir is required")?);
    let found = list_checkpoints(&dir).map_err(|e| format!("list {}: {e}", dir.display()))?;
    let (_, path) = found
        .last()
        .ok_or_else(|| format!("no checkpoints in {}", dir.display()))?;
    load_checkpoint(path).map_err(|e| format!("load {}: {e}", path.display()))
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
    for idx in 0..args.len() {
        if args[idx] == flag {
            return args.get(idx + 1).cloned();
        }
    }
    None
}

fn print_usage() {
    eprintln!("usage:");
    eprintln!("  tablesync inspect --dir <data-dir>");
    eprintln!("  tablesync verify --dir <data-dir>");
    eprintln!("  tablesync dump rows --dir <data-dir> --table <table-id> [--since <data-etag>]");
    eprintln!("  tablesync dump acls --dir <data-dir> --table <table-id>");
}
