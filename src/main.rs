// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{debug, info, warn};
use serde::Serialize;

use netplan::constants::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_MACHINE_CIDR, DEFAULT_MAX_INTERVAL, DEFAULT_MIN_INTERVAL,
};
use netplan::subnets::{self, VpcPlan};
use netplan::validation::{self, FieldError, Networking, Platform};
use netplan::{iputil, Cidr, IntervalCalculator, IntervalConfig};

fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let report = run(&args)?;
    println!("{}", report.output);
    Ok(if report.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Rendered command output. `ok` is false when the command ran but found
/// problems, such as field errors from `validate`.
#[derive(Debug)]
pub(crate) struct Report {
    pub(crate) output: String,
    pub(crate) ok: bool,
}

impl From<String> for Report {
    fn from(output: String) -> Self {
        Report { output, ok: true }
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub(crate) struct Args {
    /// Print results as JSON.
    #[arg(long, global = true)]
    pub(crate) json: bool,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Merge prefixes into the smallest covering set of CIDR blocks.
    Merge {
        prefixes: Vec<String>,
        /// Read additional prefixes from a file.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Cover an inclusive address range with CIDR blocks.
    Span { start: IpAddr, end: IpAddr },
    /// Split a VPC block into private, public and edge networks.
    Split {
        #[arg(default_value = DEFAULT_MACHINE_CIDR)]
        cidr: Cidr,
        #[arg(long, default_value_t = 3)]
        zones: usize,
        #[arg(long, default_value_t = 0)]
        edge_zones: usize,
    },
    /// Lay out per-zone subnets for a VPC.
    Plan {
        #[arg(default_value = DEFAULT_MACHINE_CIDR)]
        cidr: Cidr,
        #[arg(long = "zone", required = true)]
        zones: Vec<String>,
        #[arg(long = "edge-zone")]
        edge_zones: Vec<String>,
    },
    /// Show the requeue backoff schedule.
    Backoff {
        #[arg(long, default_value_t = DEFAULT_MIN_INTERVAL.as_secs_f64())]
        min_secs: f64,
        #[arg(long, default_value_t = DEFAULT_MAX_INTERVAL.as_secs_f64())]
        max_secs: f64,
        #[arg(long, default_value_t = DEFAULT_BACKOFF_MULTIPLIER)]
        multiplier: f64,
        #[arg(long, default_value_t = 8)]
        failures: u32,
    },
    /// Validate the networking section of an install config (JSON).
    Validate {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = Platform::Other)]
        platform: Platform,
    },
}

pub(crate) fn run(args: &Args) -> anyhow::Result<Report> {
    let output = match &args.command {
        Command::Merge { prefixes, file } => {
            let mut input = prefixes.join(",");
            if let Some(path) = file {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("failed to read prefixes from {}", path.display()))?;
                input.push(',');
                input.push_str(&contents);
            }
            let parsed = iputil::parse_prefix_list(&input)?;
            debug!("parsed {} prefixes", parsed.len());
            render_cidrs(&iputil::merge_prefixes(&parsed), args.json)?
        }
        Command::Span { start, end } => {
            render_cidrs(&iputil::span_range(*start, *end)?, args.json)?
        }
        Command::Split {
            cidr,
            zones,
            edge_zones,
        } => {
            let out = subnets::split_networks(cidr, *zones, *edge_zones)
                .with_context(|| format!("failed to split {}", cidr))?;
            if args.json {
                return Ok(serde_json::to_string_pretty(&out)?.into());
            }
            let mut lines = vec![
                format!("private: {}", out.standard.private),
                format!("public: {}", out.standard.public),
            ];
            if let Some(edge) = out.edge {
                lines.push(format!("edge private: {}", edge.private));
                lines.push(format!("edge public: {}", edge.public));
            }
            lines.join("\n")
        }
        Command::Plan {
            cidr,
            zones,
            edge_zones,
        } => {
            let plan = subnets::plan_vpc(cidr, zones, edge_zones)
                .with_context(|| format!("failed to plan subnets for {}", cidr))?;
            render_plan(&plan, args.json)?
        }
        Command::Backoff {
            min_secs,
            max_secs,
            multiplier,
            failures,
        } => {
            let mut config = IntervalConfig::new(
                duration_from_secs(*min_secs)?,
                duration_from_secs(*max_secs)?,
            );
            config.multiplier = *multiplier;
            let calc: IntervalCalculator<String> = IntervalCalculator::new(config)?;
            render_schedule(&calc.schedule(*failures), args.json)?
        }
        Command::Validate { file, platform } => {
            let contents = fs::read_to_string(file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let networking: Networking = serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse networking from {}", file.display()))?;
            let errs = validation::validate_networking(&networking, *platform);
            if errs.is_empty() {
                info!("networking in {} is valid", file.display());
            } else {
                warn!("networking in {} has {} errors", file.display(), errs.len());
            }
            return Ok(Report {
                output: render_field_errors(&errs, args.json)?,
                ok: errs.is_empty(),
            });
        }
    };
    Ok(output.into())
}

fn duration_from_secs(secs: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("invalid interval: {}", secs))
}

fn render_cidrs(cidrs: &[Cidr], json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string(cidrs)?);
    }
    Ok(cidrs
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<String>>()
        .join("\n"))
}

fn render_plan(plan: &VpcPlan, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(plan)?);
    }
    let mut lines = vec![];
    let groups = [
        ("private", &plan.private),
        ("public", &plan.public),
        ("edge-private", &plan.edge_private),
        ("edge-public", &plan.edge_public),
    ];
    for (kind, subnets) in groups {
        for s in subnets {
            lines.push(format!("{} {} {}", kind, s.zone, s.cidr));
        }
    }
    Ok(lines.join("\n"))
}

#[derive(Serialize)]
struct ScheduleEntry {
    failures: usize,
    delay_secs: f64,
}

fn render_schedule(schedule: &[Duration], json: bool) -> anyhow::Result<String> {
    if json {
        let entries = schedule
            .iter()
            .enumerate()
            .map(|(i, d)| ScheduleEntry {
                failures: i + 1,
                delay_secs: d.as_secs_f64(),
            })
            .collect::<Vec<ScheduleEntry>>();
        return Ok(serde_json::to_string(&entries)?);
    }
    Ok(schedule
        .iter()
        .enumerate()
        .map(|(i, d)| format!("{}: {:?}", i + 1, d))
        .collect::<Vec<String>>()
        .join("\n"))
}

fn render_field_errors(errs: &[FieldError], json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string(errs)?);
    }
    Ok(errs
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<String>>()
        .join("\n"))
}
