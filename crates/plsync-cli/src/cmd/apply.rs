use plsync_core::controller::{ApplyJob, BatchReport, Outcome};
use plsync_core::types::ErrorKind;
use tracing::info;

use super::generate::{detect_generator, print_failures, render_all};
use super::Context;
use crate::output::{print_json, print_report};

#[derive(serde::Serialize)]
struct ApplyOutput<'a> {
    report: &'a BatchReport,
    skipped_policies: &'a [super::generate::PolicyFailure],
}

pub fn run(ctx: &Context) -> anyhow::Result<bool> {
    let inventory = ctx.load_inventory()?;
    let generator = detect_generator(ctx)?;
    let rendered = render_all(ctx, &inventory, &generator)?;
    let controller = ctx.open_controller()?;

    let jobs: Vec<ApplyJob> = rendered
        .routers
        .iter()
        .filter(|r| !r.rendered.is_empty())
        .map(|r| ApplyJob {
            router: r.target.clone(),
            rendered: r.rendered.clone(),
        })
        .collect();
    info!(routers = jobs.len(), minutes = ctx.rollback_minutes, "applying");
    let applied = controller.apply_batch(&jobs, Some(ctx.rollback_minutes));

    // Report in policy-file order; routers with nothing rendered never
    // reached the device.
    let mut report = BatchReport::default();
    for r in &rendered.routers {
        let id = r.target.id();
        let outcome = match applied.get(&id) {
            Some(outcome) => outcome.clone(),
            None if rendered.failures.iter().any(|f| f.router == id) => Outcome::Failed {
                kind: ErrorKind::Generation,
                message: "no policy could be generated".to_string(),
            },
            None => continue,
        };
        report.push(&r.target, outcome);
    }

    if ctx.json {
        print_json(&ApplyOutput {
            report: &report,
            skipped_policies: &rendered.failures,
        })?;
    } else {
        print_report(&report, false)?;
        print_failures(&rendered.failures);
        if report
            .outcomes
            .iter()
            .any(|o| matches!(o.outcome, Outcome::Applied { .. }))
        {
            println!();
            println!(
                "Changes roll back automatically in {} minute(s). Verify, then run: plsync --commit all",
                ctx.rollback_minutes
            );
        }
    }
    Ok(!report.has_failures() && rendered.failures.is_empty())
}
