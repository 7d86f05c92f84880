//! Dry run: render every router's configuration and write it to disk.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context as _;
use chrono::Utc;
use plsync_core::config::{Inventory, PolicyDefinition, RouterTarget};
use plsync_core::generator::{Bgpq4, GeneratedPrefixList, PrefixListGenerator};
use plsync_core::render::{self, RenderedConfiguration};
use plsync_core::{io, PlsyncError};
use serde::Serialize;
use tracing::{info, warn};

use super::Context;
use crate::output::{print_json, print_table};

#[derive(Debug, Serialize)]
pub struct RenderedRouter {
    #[serde(skip)]
    pub target: RouterTarget,
    #[serde(flatten)]
    pub rendered: RenderedConfiguration,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct PolicyFailure {
    pub router: String,
    pub hostname: String,
    pub policy: String,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
pub struct RenderRun {
    pub routers: Vec<RenderedRouter>,
    pub failures: Vec<PolicyFailure>,
}

/// Identity of one bgpq4 query; policies sharing it across routers are
/// generated once.
type QueryKey = (String, String, String, u8);

fn query_key(p: &PolicyDefinition) -> QueryKey {
    (
        p.name.clone(),
        p.as_set.clone(),
        p.rir.to_string(),
        p.max_prefix_length,
    )
}

/// Generate, render and write every router in `inventory`. Generation
/// failures skip that policy and are collected; they never stop the run.
pub fn render_all(
    ctx: &Context,
    inventory: &Inventory,
    generator: &dyn PrefixListGenerator,
) -> anyhow::Result<RenderRun> {
    io::ensure_dir(&ctx.output_dir)
        .with_context(|| format!("cannot create {}", ctx.output_dir.display()))?;

    let now = Utc::now();
    let mut cache: HashMap<QueryKey, Result<GeneratedPrefixList, String>> = HashMap::new();
    let mut run = RenderRun::default();

    for rp in &inventory.routers {
        let router = &rp.router;
        let mut generated = Vec::new();
        for policy in &rp.policies {
            let result = cache.entry(query_key(policy)).or_insert_with(|| {
                generator.generate(policy).map_err(|source| {
                    PlsyncError::Generation {
                        policy: policy.name.clone(),
                        source,
                    }
                    .to_string()
                })
            });
            match result {
                Ok(list) => generated.push(list.clone()),
                Err(message) => {
                    warn!(router = %router.id(), policy = %policy.name, "{message}");
                    run.failures.push(PolicyFailure {
                        router: router.id(),
                        hostname: router.hostname.clone(),
                        policy: policy.name.clone(),
                        kind: "GenerationError",
                        message: message.clone(),
                    });
                }
            }
        }

        let rendered = render::render(router, &rp.policies, &generated, now);
        let file = if rendered.is_empty() {
            None
        } else {
            let path = render::write_generated(&ctx.output_dir, &rendered)
                .with_context(|| format!("cannot write configuration for {}", router.hostname))?;
            info!(router = %router.id(), file = %path.display(), digest = %rendered.short_digest(), "configuration rendered");
            Some(path)
        };
        run.routers.push(RenderedRouter {
            target: router.clone(),
            rendered,
            file,
        });
    }
    Ok(run)
}

pub fn detect_generator(ctx: &Context) -> anyhow::Result<Bgpq4> {
    Bgpq4::detect(ctx.generator_timeout).context("prefix-list generator unavailable")
}

pub fn print_failures(failures: &[PolicyFailure]) {
    if failures.is_empty() {
        return;
    }
    eprintln!();
    eprintln!("Policies skipped:");
    for f in failures {
        eprintln!("  {} ({}) {}: {}", f.hostname, f.router, f.policy, f.message);
    }
}

pub fn run(ctx: &Context) -> anyhow::Result<bool> {
    let inventory = ctx.load_inventory()?;
    let generator = detect_generator(ctx)?;
    let run = render_all(ctx, &inventory, &generator)?;

    if ctx.json {
        print_json(&run)?;
    } else {
        let rows = run
            .routers
            .iter()
            .map(|r| {
                vec![
                    r.rendered.router.clone(),
                    r.rendered.hostname.clone(),
                    r.rendered.policies.join(","),
                    r.rendered.short_digest().to_string(),
                    r.file
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ]
            })
            .collect();
        print_table(&["ROUTER", "HOSTNAME", "POLICIES", "DIGEST", "FILE"], rows);
        print_failures(&run.failures);
        println!();
        println!("Dry run only. Review the files, then run with --apply.");
    }
    Ok(run.failures.is_empty())
}
