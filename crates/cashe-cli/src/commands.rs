use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{bail, Context};
use cashe_store::{file_to_hex_digest, CacheObject, Store, StoreConfig};
use cashe_types::{ChecksumType, ObjectKey};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use tracing::debug;

use crate::cli::*;
use crate::display::{link_marker, ui_num, ui_time};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(cli.config.as_deref(), cli.path, cli.copy_only)?;
    let out = Output {
        format: cli.format,
        verbose: cli.verbose,
        sort_by: cli.sort_by.resolve(),
    };
    match cli.command.unwrap_or_else(|| Command::Summary(FilterArgs::default())) {
        Command::Summary(args) => cmd_summary(&open(config)?, args, out),
        Command::List(args) => cmd_list(&open(config)?, args, out),
        Command::Info(args) => cmd_info(&open(config)?, args, out),
        Command::Check(args) => cmd_check(&open(config)?, args, out),
        Command::Save(args) => cmd_save(&open(config)?, args, out),
        Command::SaveFast(args) => {
            let store = open(config)?;
            let row = save_one(&store, args.checksum_type, &args.digest, &args.file, Some(false))?;
            report_transfers("saved", &[row], out)
        }
        Command::Load(args) => cmd_load(&open(config)?, args, out),
        Command::Unlink(args) => cmd_unlink(&open(config)?, args, out),
        Command::LsExtra => cmd_ls_extra(&open(config)?, out),
        Command::RmExtra => cmd_rm_extra(&open(config)?, out),
        Command::ListFiles(args) => cmd_list_files(&open(config)?, args, out),
        Command::Recent(args) => cmd_recent(&open(config)?, args, out),
        Command::ChecksumFile(args) => cmd_checksum_file(args, out),
        Command::Config => cmd_config(&config, out),
    }
}

/// File values first, then command-line overrides.
pub(crate) fn resolve_config(
    file: Option<&Path>,
    root: Option<PathBuf>,
    copy_only: bool,
) -> anyhow::Result<StoreConfig> {
    let mut config = match file {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    if let Some(root) = root {
        config = config.with_root(root);
    }
    if copy_only {
        config = config.with_try_link(false);
    }
    debug!(root = %config.root.display(), try_link = config.try_link, "configuration resolved");
    Ok(config)
}

fn open(config: StoreConfig) -> anyhow::Result<Store> {
    let root = config.root.clone();
    Store::open(config).with_context(|| format!("opening cache at {}", root.display()))
}

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    verbose: bool,
    sort_by: SortBy,
}

impl Output {
    fn json(self) -> bool {
        self.format == OutputFormat::Json
    }

    fn emit<T: Serialize>(self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Object queries
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ObjectRow {
    checksum_type: ChecksumType,
    checksum_data: String,
    size: u64,
    nlink: u64,
    path: PathBuf,
    modified: Option<DateTime<Utc>>,
    accessed: Option<DateTime<Utc>>,
    changed: Option<DateTime<Utc>>,
}

fn select(
    store: &Store,
    filter: &FilterArgs,
    sort_by: SortBy,
) -> anyhow::Result<Vec<CacheObject>> {
    let mut objects = store.list(filter.checksum_type)?;
    if let Some(prefix) = filter.prefix.as_deref().map(str::to_ascii_lowercase) {
        objects.retain(|obj| obj.checksum_data().starts_with(&prefix));
    }
    sort_objects(&mut objects, sort_by)?;
    Ok(objects)
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Path(PathBuf),
    Num(u64),
    Time(Option<SystemTime>),
}

/// Stable: ties keep listing order.
fn sort_objects(objects: &mut Vec<CacheObject>, sort_by: SortBy) -> anyhow::Result<()> {
    let mut keyed = Vec::with_capacity(objects.len());
    for mut obj in objects.drain(..) {
        let key = match sort_by.resolve() {
            SortBy::Size => SortKey::Num(obj.size()?),
            SortBy::Nlink => SortKey::Num(obj.nlink()?),
            SortBy::Mtime => SortKey::Time(obj.modified()?),
            SortBy::Ctime => SortKey::Time(obj.changed()?),
            SortBy::Atime | SortBy::Time => SortKey::Time(obj.accessed()?),
            SortBy::Filename => SortKey::Path(obj.path().to_path_buf()),
        };
        keyed.push((key, obj));
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    objects.extend(keyed.into_iter().map(|(_, obj)| obj));
    Ok(())
}

/// Stat each object once; objects that vanished since listing are skipped.
fn describe(objects: Vec<CacheObject>) -> anyhow::Result<Vec<ObjectRow>> {
    let mut rows = Vec::with_capacity(objects.len());
    for mut obj in objects {
        if !obj.exists()? {
            continue;
        }
        rows.push(ObjectRow {
            checksum_type: obj.checksum_type(),
            checksum_data: obj.checksum_data().to_string(),
            size: obj.size()?,
            nlink: obj.nlink()?,
            path: obj.path().to_path_buf(),
            modified: obj.modified()?.map(DateTime::from),
            accessed: obj.accessed()?.map(DateTime::from),
            changed: obj.changed()?.map(DateTime::from),
        });
    }
    Ok(rows)
}

#[derive(Default, Serialize)]
struct Tally {
    objects: u64,
    size: u64,
    used_objects: u64,
    used_size: u64,
    free_objects: u64,
    free_size: u64,
}

impl Tally {
    fn add(&mut self, row: &ObjectRow) {
        self.objects += 1;
        self.size += row.size;
        if row.nlink > 1 {
            self.used_objects += 1;
            self.used_size += row.size;
        } else {
            self.free_objects += 1;
            self.free_size += row.size;
        }
    }

    fn print(&self, verbose: bool) {
        if verbose {
            println!("  Used Objs: {}", ui_num(self.used_objects));
            println!("  Used Size: {}", ui_num(self.used_size));
            println!("  Free Objs: {}", ui_num(self.free_objects));
            println!("  Free Size: {}", ui_num(self.free_size));
        }
        println!("       Objs: {}", ui_num(self.objects));
        println!("       Size: {}", ui_num(self.size));
    }
}

#[derive(Default, Serialize)]
struct Summary {
    types: BTreeMap<&'static str, Tally>,
    all: Tally,
}

fn cmd_summary(store: &Store, args: FilterArgs, out: Output) -> anyhow::Result<()> {
    let mut summary = Summary::default();
    for row in describe(select(store, &args, out.sort_by)?)? {
        summary.types.entry(row.checksum_type.name()).or_default().add(&row);
        summary.all.add(&row);
    }
    if out.json() {
        return out.emit(&summary);
    }
    for (name, tally) in &summary.types {
        println!("Type: {}", name.bold());
        tally.print(out.verbose);
    }
    println!("{}", "--All--".bold());
    println!("      Types: {}", summary.types.len());
    summary.all.print(out.verbose);
    Ok(())
}

fn cmd_list(store: &Store, args: FilterArgs, out: Output) -> anyhow::Result<()> {
    let rows = describe(select(store, &args, out.sort_by)?)?;
    if out.json() {
        return out.emit(&rows);
    }
    for row in &rows {
        println!(
            "{}{:<6} {:<64} {}",
            link_marker(row.nlink),
            row.checksum_type.name(),
            row.checksum_data,
            ui_num(row.size)
        );
    }
    Ok(())
}

fn cmd_info(store: &Store, args: FilterArgs, out: Output) -> anyhow::Result<()> {
    let rows = describe(select(store, &args, out.sort_by)?)?;
    if out.json() {
        return out.emit(&rows);
    }
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("Type: {}", row.checksum_type.name().bold());
        println!("Data: {}", row.checksum_data.yellow());
        println!("   Size: {}", ui_num(row.size));
        println!("  Links: {}", ui_num(row.nlink.saturating_sub(1)));
        if let Some(t) = row.modified {
            println!(" M-Time: {}", ui_time(t.into()));
        }
        if let Some(t) = row.accessed {
            println!(" A-Time: {}", ui_time(t.into()));
        }
        if out.verbose || out.sort_by == SortBy::Ctime {
            if let Some(t) = row.changed {
                println!(" C-Time: {}", ui_time(t.into()));
            }
        }
        if out.verbose {
            println!("   File: {}", row.path.display());
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct CheckRow {
    key: ObjectKey,
    valid: bool,
}

fn cmd_check(store: &Store, args: FilterArgs, out: Output) -> anyhow::Result<()> {
    let mut rows = Vec::new();
    for mut obj in select(store, &args, out.sort_by)? {
        let nlink = obj.nlink()?;
        let valid = match obj.verify() {
            Ok(valid) => valid,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        };
        if !out.json() {
            let status = if valid { "ok".green() } else { "corrupt, removed".red() };
            println!(
                "{}{:<6} {:<64} {}",
                link_marker(nlink),
                obj.checksum_type().name(),
                obj.checksum_data(),
                status
            );
        }
        rows.push(CheckRow {
            key: obj.key().clone(),
            valid,
        });
    }
    if out.json() {
        out.emit(&rows)?;
    }
    let corrupt = rows.iter().filter(|r| !r.valid).count();
    if corrupt > 0 {
        bail!("{corrupt} corrupt object(s) removed");
    }
    Ok(())
}

fn cmd_list_files(store: &Store, args: FilterArgs, out: Output) -> anyhow::Result<()> {
    let paths: Vec<PathBuf> = select(store, &args, out.sort_by.time_only())?
        .iter()
        .map(|obj| obj.path().to_path_buf())
        .collect();
    print_paths(&paths, out)
}

/// The last `count` objects in time order.
fn recent(
    store: &Store,
    filter: &FilterArgs,
    count: usize,
    sort_by: SortBy,
) -> anyhow::Result<Vec<CacheObject>> {
    let mut objects = select(store, filter, sort_by.time_only())?;
    let older = objects.len().saturating_sub(count);
    objects.drain(..older);
    Ok(objects)
}

fn cmd_recent(store: &Store, args: RecentArgs, out: Output) -> anyhow::Result<()> {
    let paths: Vec<PathBuf> = recent(store, &args.filter, args.count, out.sort_by)?
        .iter()
        .map(|obj| obj.path().to_path_buf())
        .collect();
    print_paths(&paths, out)
}

fn print_paths(paths: &[PathBuf], out: Output) -> anyhow::Result<()> {
    if out.json() {
        return out.emit(&paths);
    }
    for path in paths {
        println!("{}", path.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct TransferRow {
    key: ObjectKey,
    file: PathBuf,
    via: String,
}

/// Pair each file with the digest to save it under; `None` means compute it.
///
/// Two items whose first has the digest length of `checksum_type` are
/// `<digest> <file>`; anything else is a list of files.
pub(crate) fn save_plan(
    checksum_type: ChecksumType,
    items: &[String],
) -> Vec<(Option<String>, PathBuf)> {
    match items {
        [digest, file] if digest.len() == checksum_type.hex_len() => {
            vec![(Some(digest.clone()), PathBuf::from(file))]
        }
        files => files.iter().map(|f| (None, PathBuf::from(f))).collect(),
    }
}

fn cmd_save(store: &Store, args: SaveArgs, out: Output) -> anyhow::Result<()> {
    let ty = args.checksum_type;
    let mut rows = Vec::new();
    for (digest, file) in save_plan(ty, &args.items) {
        // A caller-supplied digest is always checked; a computed one follows
        // `checksum_save`.
        let (digest, verify) = match digest {
            Some(digest) => (digest, Some(true)),
            None => {
                let digest = file_to_hex_digest(ty, &file, None, None)
                    .with_context(|| format!("digesting {}", file.display()))?;
                (digest, None)
            }
        };
        rows.push(save_one(store, ty, &digest, &file, verify)?);
    }
    report_transfers("saved", &rows, out)
}

/// `verify` overrides the store's `checksum_save` when set.
fn save_one(
    store: &Store,
    checksum_type: ChecksumType,
    digest: &str,
    file: &Path,
    verify: Option<bool>,
) -> anyhow::Result<TransferRow> {
    let mut obj = store.object_for(ObjectKey::new(checksum_type, digest)?);
    let via = match verify {
        Some(verify) => obj.put(file, verify),
        None => store.save(&mut obj, file),
    }
    .with_context(|| format!("saving {}", file.display()))?;
    Ok(TransferRow {
        key: obj.key().clone(),
        file: file.to_path_buf(),
        via: via.to_string(),
    })
}

fn cmd_load(store: &Store, args: ObjectFileArgs, out: Output) -> anyhow::Result<()> {
    let mut obj = store.object_for(ObjectKey::new(args.checksum_type, &args.digest)?);
    let via = store
        .load(&mut obj, &args.file)
        .with_context(|| format!("loading into {}", args.file.display()))?;
    let row = TransferRow {
        key: obj.key().clone(),
        file: args.file,
        via: via.to_string(),
    };
    report_transfers("loaded", &[row], out)
}

fn report_transfers(verb: &str, rows: &[TransferRow], out: Output) -> anyhow::Result<()> {
    if out.json() {
        return out.emit(&rows);
    }
    for row in rows {
        println!(
            "{} {} {} ({})",
            verb.green(),
            row.key.to_string().yellow(),
            row.file.display(),
            row.via
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct UnlinkRow {
    key: ObjectKey,
    removed: bool,
}

fn cmd_unlink(store: &Store, args: ObjectArgs, out: Output) -> anyhow::Result<()> {
    let obj = store.object_for(ObjectKey::new(args.checksum_type, &args.digest)?);
    let key = obj.key().clone();
    let removed = store.remove(obj)?;
    if out.json() {
        return out.emit(&UnlinkRow { key, removed });
    }
    if removed {
        println!("{} {}", "removed".green(), key.to_string().yellow());
    } else {
        println!("{} {}", "not cached".yellow(), key);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

fn cmd_ls_extra(store: &Store, out: Output) -> anyhow::Result<()> {
    let strays = store.stray_paths()?;
    if out.json() {
        return out.emit(&strays);
    }
    for path in &strays {
        println!("{}", path.display());
    }
    Ok(())
}

fn cmd_rm_extra(store: &Store, out: Output) -> anyhow::Result<()> {
    let removed = store.remove_stray()?;
    if out.json() {
        return out.emit(&removed);
    }
    for path in &removed {
        println!("{} {}", "rm".red(), path.display());
    }
    Ok(())
}

#[derive(Serialize)]
struct DigestRow {
    checksum_type: ChecksumType,
    checksum_data: String,
    file: PathBuf,
}

fn cmd_checksum_file(args: ChecksumFileArgs, out: Output) -> anyhow::Result<()> {
    let checksum_data = file_to_hex_digest(args.checksum_type, &args.file, None, None)
        .with_context(|| format!("digesting {}", args.file.display()))?;
    if out.json() {
        return out.emit(&DigestRow {
            checksum_type: args.checksum_type,
            checksum_data,
            file: args.file,
        });
    }
    println!("{checksum_data}  {}", args.file.display());
    Ok(())
}

fn cmd_config(config: &StoreConfig, out: Output) -> anyhow::Result<()> {
    if out.json() {
        return out.emit(config);
    }
    let defaults = StoreConfig::default();
    let origin = |is_default: bool| if is_default { "def" } else { "usr" };
    println!(
        "      Root({}): {}",
        origin(config.root == defaults.root),
        config.root.display()
    );
    println!(
        "  Try-link({}): {}",
        origin(config.try_link == defaults.try_link),
        config.try_link
    );
    println!(
        "Check-save({}): {}",
        origin(config.checksum_save == defaults.checksum_save),
        config.checksum_save
    );
    println!(
        "Check-load({}): {}",
        origin(config.checksum_load == defaults.checksum_load),
        config.checksum_load
    );
    Ok(())
}
