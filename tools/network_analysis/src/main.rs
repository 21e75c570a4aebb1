//! Region-group batch runner.
//! Reads flowline, join and barrier tables per region group, delineates
//! barrier networks for each network type, and writes the network tables to
//! `{output}/{group}/{network_type}/`.

use anyhow::{bail, Context, Result};
use barrier_net_core::{
    analyze_region, AnalysisConfig, Barrier, BarrierId, BarrierKind, BarrierPosition, Coord, Join,
    NetworkOrigin, NetworkStats, NetworkType, RegionInput, RegionOutput, RegionSummary, Segment,
    SegmentId,
};
use barrier_net_core::segment::meters_to_miles;
use clap::Parser;
use rayon::prelude::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "network_analysis", about = "Delineate barrier networks per region group")]
struct Args {
    /// Directory containing one sub-directory per region group.
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory; one sub-directory per group and network type.
    #[arg(short, long, default_value = "data/networks")]
    output: PathBuf,

    /// Runner configuration JSON. Built-in defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Process only this region group.
    #[arg(short, long)]
    group: Option<String>,

    /// Run a single network type (natural, dams, small_barriers).
    #[arg(short = 't', long, value_parser = parse_network_type)]
    network_type: Option<NetworkType>,

    /// Debug-level logging unless RUST_LOG is set.
    #[arg(short, long)]
    verbose: bool,
}

fn parse_network_type(s: &str) -> std::result::Result<NetworkType, String> {
    match s {
        "natural" => Ok(NetworkType::Natural),
        "dams" => Ok(NetworkType::Dams),
        "small_barriers" => Ok(NetworkType::SmallBarriers),
        other => Err(format!("unknown network type '{other}'")),
    }
}

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct RunnerConfig {
    /// Group name -> region keys (e.g. HUC2 codes) whose barriers belong to
    /// the group. Empty: every input sub-directory is a group and keeps all
    /// of its barriers.
    region_groups: BTreeMap<String, Vec<String>>,
    network_types: Vec<NetworkType>,
    /// Attempts per group before it is reported as failed.
    max_attempts: u32,
    analysis: AnalysisConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            region_groups: BTreeMap::new(),
            network_types: vec![NetworkType::Natural, NetworkType::Dams, NetworkType::SmallBarriers],
            max_attempts: 2,
            analysis: AnalysisConfig::default(),
        }
    }
}

impl RunnerConfig {
    fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// One unit of work: a group directory plus its region-key filter.
#[derive(Debug, Clone)]
struct RegionGroup {
    name: String,
    /// Region keys to keep; `None` keeps every barrier.
    regions: Option<Vec<String>>,
}

fn discover_groups(input: &Path, config: &RunnerConfig, only: Option<&str>) -> Result<Vec<RegionGroup>> {
    let mut groups: Vec<RegionGroup> = if config.region_groups.is_empty() {
        let mut names = Vec::new();
        for entry in fs::read_dir(input).with_context(|| format!("listing {}", input.display()))? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        names.into_iter().map(|name| RegionGroup { name, regions: None }).collect()
    } else {
        config
            .region_groups
            .iter()
            .map(|(name, regions)| RegionGroup { name: name.clone(), regions: Some(regions.clone()) })
            .collect()
    };

    if let Some(only) = only {
        groups.retain(|g| g.name == only);
        if groups.is_empty() {
            bail!("region group '{only}' not found");
        }
    }
    Ok(groups)
}

// ── Input tables ──────────────────────────────────────────────────────────────

/// Flat `barriers.csv` row; either `fraction` or both `x` and `y` are set.
#[derive(Debug, Deserialize)]
struct BarrierRow {
    barrier_id: BarrierId,
    kind: BarrierKind,
    segment_id: SegmentId,
    fraction: Option<f64>,
    x: Option<f64>,
    y: Option<f64>,
    #[serde(default)]
    region: String,
}

impl BarrierRow {
    fn into_barrier(self) -> Result<Barrier> {
        let position = match (self.fraction, self.x, self.y) {
            (Some(f), _, _) => BarrierPosition::Fraction(f),
            (None, Some(x), Some(y)) => BarrierPosition::Point(Coord { x, y }),
            _ => bail!("barrier {} has neither fraction nor x/y", self.barrier_id),
        };
        Ok(Barrier {
            id: self.barrier_id,
            kind: self.kind,
            segment_id: self.segment_id,
            position,
            region: self.region,
        })
    }
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .with_context(|| format!("reading {}", path.display()))
}

fn load_group(dir: &Path, group: &RegionGroup) -> Result<RegionInput> {
    let segments_path = dir.join("segments.json");
    let file = File::open(&segments_path).with_context(|| format!("opening {}", segments_path.display()))?;
    let segments: Vec<Segment> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", segments_path.display()))?;

    let joins: Vec<Join> = read_csv(&dir.join("joins.csv"))?;

    let rows: Vec<BarrierRow> = read_csv(&dir.join("barriers.csv"))?;
    let mut barriers = Vec::with_capacity(rows.len());
    for row in rows {
        let keep = group.regions.as_ref().map_or(true, |r| r.contains(&row.region));
        if keep {
            barriers.push(row.into_barrier()?);
        }
    }

    info!(
        group = %group.name,
        segments = segments.len(),
        joins = joins.len(),
        barriers = barriers.len(),
        "loaded region group"
    );
    Ok(RegionInput { segments, joins, barriers })
}

// ── Output tables ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct NetworkStatsRow {
    network_id: SegmentId,
    origin: NetworkOrigin,
    total_miles: f64,
    free_miles: f64,
    total_km: f64,
    free_km: f64,
    loop_miles: f64,
    mainstem_miles: f64,
    sinuosity: f64,
    size_classes: u32,
    segments: u32,
    up_ndams: u32,
    up_nwfs: u32,
    up_sbs: u32,
}

impl From<&NetworkStats> for NetworkStatsRow {
    fn from(s: &NetworkStats) -> Self {
        Self {
            network_id: s.network_id,
            origin: s.origin,
            total_miles: s.total_miles(),
            free_miles: s.free_miles(),
            total_km: s.total_km(),
            free_km: s.free_km(),
            loop_miles: meters_to_miles(s.loop_length),
            mainstem_miles: meters_to_miles(s.mainstem_length),
            sinuosity: s.sinuosity,
            size_classes: s.size_classes,
            segments: s.segment_count,
            up_ndams: s.upstream_barriers.dams,
            up_nwfs: s.upstream_barriers.waterfalls,
            up_sbs: s.upstream_barriers.small_barriers,
        }
    }
}

#[derive(Serialize)]
struct RunSummary<'a> {
    group: &'a str,
    network_type: NetworkType,
    #[serde(flatten)]
    summary: &'a RegionSummary,
}

fn write_csv<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("writing {}", path.display()))
}

fn write_tables(dir: &Path, group: &str, network_type: NetworkType, out: &RegionOutput) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    write_json(&dir.join("segments.json"), &out.segments)?;
    write_csv(&dir.join("joins.csv"), &out.joins)?;
    write_csv(&dir.join("barrier_joins.csv"), &out.barrier_joins)?;
    write_csv(&dir.join("barrier_joins_raw.csv"), &out.raw_barrier_joins)?;
    write_csv(&dir.join("network_segments.csv"), &out.network_segments)?;
    write_csv(&dir.join("network_stats.csv"), out.network_stats.iter().map(NetworkStatsRow::from))?;
    write_csv(&dir.join("barriers_network.csv"), &out.barrier_networks)?;
    write_json(
        &dir.join("summary.json"),
        &RunSummary { group, network_type, summary: &out.summary },
    )
}

/// Stage every network type of a group under one temporary sibling
/// directory, then swap it into place with a single rename. Network-type
/// directories from earlier runs that this run does not rewrite are carried
/// over.
fn write_group_outputs(output: &Path, group: &str, results: &[(NetworkType, RegionOutput)]) -> Result<()> {
    fs::create_dir_all(output).with_context(|| format!("creating {}", output.display()))?;
    let dir = output.join(group);
    let tmp = output.join(format!(".{group}.tmp"));
    if tmp.exists() {
        fs::remove_dir_all(&tmp)?;
    }

    for (network_type, out) in results {
        write_tables(&tmp.join(network_type.as_str()), group, *network_type, out)?;
    }

    if dir.is_dir() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let staged = tmp.join(entry.file_name());
            if !staged.exists() {
                fs::rename(entry.path(), &staged)
                    .with_context(|| format!("carrying over {}", entry.path().display()))?;
            }
        }
        fs::remove_dir_all(&dir)?;
    }
    fs::rename(&tmp, &dir).with_context(|| format!("moving outputs into {}", dir.display()))?;
    Ok(())
}

// ── Group processing ──────────────────────────────────────────────────────────

fn process_group(
    input: &Path,
    output: &Path,
    group: &RegionGroup,
    network_types: &[NetworkType],
    analysis: &AnalysisConfig,
) -> Result<()> {
    let region = load_group(&input.join(&group.name), group)?;

    // Analyse every network type before writing anything.
    let mut results = Vec::with_capacity(network_types.len());
    for &network_type in network_types {
        let config = analysis.clone().with_network_type(network_type);
        let out = analyze_region(&region, &config)
            .with_context(|| format!("group {} ({})", group.name, network_type.as_str()))?;
        results.push((network_type, out));
    }

    write_group_outputs(output, &group.name, &results)?;
    for (network_type, out) in &results {
        info!(
            group = %group.name,
            network_type = network_type.as_str(),
            networks = out.summary.networks,
            barriers = out.barrier_networks.len(),
            "wrote network outputs"
        );
    }
    Ok(())
}

/// Call `attempt` until it succeeds or `max_attempts` calls have failed.
fn retry<T>(label: &str, max_attempts: u32, mut attempt: impl FnMut() -> Result<T>) -> Result<T> {
    let max_attempts = max_attempts.max(1);
    let mut tries = 1;
    loop {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(e) if tries < max_attempts => {
                warn!(group = %label, attempt = tries, error = %format!("{e:#}"), "group failed, retrying");
                tries += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run a group, retrying it as a whole on failure.
fn run_with_retry(
    input: &Path,
    output: &Path,
    group: &RegionGroup,
    config: &RunnerConfig,
) -> Result<()> {
    retry(&group.name, config.max_attempts, || {
        process_group(input, output, group, &config.network_types, &config.analysis)
    })
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::default(),
    };
    if let Some(network_type) = args.network_type {
        config.network_types = vec![network_type];
    }

    let groups = discover_groups(&args.input, &config, args.group.as_deref())?;
    info!(groups = groups.len(), input = %args.input.display(), "starting network analysis");

    let failed: Vec<String> = groups
        .par_iter()
        .filter_map(|group| match run_with_retry(&args.input, &args.output, group, &config) {
            Ok(()) => None,
            Err(e) => {
                error!(group = %group.name, error = %format!("{e:#}"), "group failed");
                Some(group.name.clone())
            }
        })
        .collect();

    if !failed.is_empty() {
        bail!("{} of {} region groups failed: {}", failed.len(), groups.len(), failed.join(", "));
    }
    info!(groups = groups.len(), output = %args.output.display(), "done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use barrier_net_core::geometry::path_length;
    use barrier_net_core::LineString;
    use std::cell::Cell;

    fn segment(id: SegmentId, points: &[(f64, f64)]) -> Segment {
        let geometry = LineString::from(points.to_vec());
        Segment {
            id,
            source_id: 10_000 + id as u64,
            length: path_length(&geometry),
            geometry,
            stream_order: 1,
            size_class: "1a".into(),
            is_loop: false,
        }
    }

    /// 1 -> 2 -> outlet, a dam halfway down 2 in region "02" and a small
    /// barrier on 1 in region "03".
    fn write_group(root: &Path, name: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        let segments = vec![
            segment(1, &[(0.0, 2000.0), (0.0, 1000.0)]),
            segment(2, &[(0.0, 1000.0), (0.0, 0.0)]),
        ];
        fs::write(dir.join("segments.json"), serde_json::to_string(&segments).unwrap()).unwrap();
        fs::write(dir.join("joins.csv"), "upstream_id,downstream_id\n0,1\n1,2\n2,0\n").unwrap();
        fs::write(
            dir.join("barriers.csv"),
            "barrier_id,kind,segment_id,fraction,x,y,region\n\
             10,dam,2,0.5,,,02\n\
             11,small_barrier,1,,0,1500,03\n",
        )
        .unwrap();
    }

    #[test]
    fn barrier_row_requires_a_position() {
        let row = BarrierRow {
            barrier_id: 1,
            kind: BarrierKind::Dam,
            segment_id: 1,
            fraction: None,
            x: Some(1.0),
            y: None,
            region: String::new(),
        };
        assert!(row.into_barrier().is_err());
    }

    #[test]
    fn runner_config_partial_json() {
        let cfg: RunnerConfig = serde_json::from_str(
            r#"{"region_groups": {"south": ["02", "03"]}, "analysis": {"endpoint_tolerance": 5.0}}"#,
        )
        .unwrap();
        assert_eq!(cfg.region_groups["south"], vec!["02", "03"]);
        assert_eq!(cfg.network_types.len(), 3);
        assert_eq!(cfg.max_attempts, 2);
        assert_eq!(cfg.analysis.endpoint_tolerance, 5.0);
    }

    #[test]
    fn region_keys_filter_barriers() {
        let tmp = tempfile::tempdir().unwrap();
        write_group(tmp.path(), "south");
        let group = RegionGroup { name: "south".into(), regions: Some(vec!["02".into()]) };
        let input = load_group(&tmp.path().join("south"), &group).unwrap();
        assert_eq!(input.barriers.len(), 1);
        assert_eq!(input.barriers[0].id, 10);

        let all = RegionGroup { name: "south".into(), regions: None };
        let input = load_group(&tmp.path().join("south"), &all).unwrap();
        assert_eq!(input.barriers.len(), 2);
        assert!(matches!(input.barriers[1].position, BarrierPosition::Point(_)));
    }

    #[test]
    fn group_outputs_written_per_network_type() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_group(input.path(), "south");

        let config = RunnerConfig::default();
        let groups = discover_groups(input.path(), &config, None).unwrap();
        assert_eq!(groups.len(), 1);
        run_with_retry(input.path(), output.path(), &groups[0], &config).unwrap();

        for nt in ["natural", "dams", "small_barriers"] {
            let dir = output.path().join("south").join(nt);
            for file in [
                "segments.json",
                "joins.csv",
                "barrier_joins.csv",
                "barrier_joins_raw.csv",
                "network_segments.csv",
                "network_stats.csv",
                "barriers_network.csv",
                "summary.json",
            ] {
                assert!(dir.join(file).exists(), "missing {nt}/{file}");
            }
        }
        assert!(!output.path().join(".south.tmp").exists());

        let dams = fs::read_to_string(output.path().join("south/dams/barriers_network.csv")).unwrap();
        assert_eq!(dams.lines().count(), 2, "header plus the dam row:\n{dams}");
        let small = fs::read_to_string(output.path().join("south/small_barriers/barriers_network.csv")).unwrap();
        assert_eq!(small.lines().count(), 3, "header plus two rows:\n{small}");

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(output.path().join("south/natural/summary.json")).unwrap())
                .unwrap();
        assert_eq!(summary["group"], "south");
        assert_eq!(summary["network_type"], "natural");
        assert_eq!(summary["networks"], 1);
    }

    #[test]
    fn structural_error_leaves_no_output() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_group(input.path(), "broken");
        fs::write(
            input.path().join("broken/joins.csv"),
            "upstream_id,downstream_id\n1,2\n1,0\n2,0\n",
        )
        .unwrap();

        let config = RunnerConfig::default();
        let group = RegionGroup { name: "broken".into(), regions: None };
        let err = run_with_retry(input.path(), output.path(), &group, &config).unwrap_err();
        assert!(format!("{err:#}").contains("downstream joins"), "{err:#}");
        assert!(!output.path().join("broken").exists());
    }

    #[test]
    fn single_type_rerun_keeps_other_types() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_group(input.path(), "south");
        let group = RegionGroup { name: "south".into(), regions: None };

        run_with_retry(input.path(), output.path(), &group, &RunnerConfig::default()).unwrap();
        let natural = output.path().join("south/natural/summary.json");
        fs::write(&natural, "stale").unwrap();

        let config = RunnerConfig { network_types: vec![NetworkType::Dams], ..RunnerConfig::default() };
        run_with_retry(input.path(), output.path(), &group, &config).unwrap();

        assert_eq!(fs::read_to_string(&natural).unwrap(), "stale", "natural outputs carried over");
        let dams = fs::read_to_string(output.path().join("south/dams/summary.json")).unwrap();
        assert!(dams.contains("\"network_type\": \"dams\""), "{dams}");
        assert!(!output.path().join(".south.tmp").exists());
    }

    #[test]
    fn retry_recovers_after_a_failed_attempt() {
        let calls = Cell::new(0);
        let value = retry("south", 2, || {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                bail!("transient failure");
            }
            Ok(calls.get())
        })
        .unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let err = retry("south", 3, || -> Result<()> {
            calls.set(calls.get() + 1);
            bail!("attempt {} failed", calls.get())
        })
        .unwrap_err();
        assert_eq!(calls.get(), 3);
        assert_eq!(err.to_string(), "attempt 3 failed");
    }

    #[test]
    fn unknown_group_is_an_error() {
        let input = tempfile::tempdir().unwrap();
        write_group(input.path(), "south");
        assert!(discover_groups(input.path(), &RunnerConfig::default(), Some("north")).is_err());
    }
}
