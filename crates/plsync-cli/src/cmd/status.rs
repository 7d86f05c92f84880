use chrono::Utc;
use plsync_core::commit::{AuditRecord, PendingCommit};
use serde::Serialize;

use super::Context;
use crate::output::{pending_rows, print_json, print_table, timestamp};

#[derive(Serialize)]
struct StatusOutput {
    pending: Vec<PendingCommit>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    history: Vec<AuditRecord>,
}

pub fn run(ctx: &Context, target: &str) -> anyhow::Result<bool> {
    let inventory = ctx.load_inventory_if_present()?;
    let controller = ctx.open_controller()?;

    let (pending, history) = if target.eq_ignore_ascii_case("all") {
        (controller.query_all()?, Vec::new())
    } else {
        // Accept a hostname from the policy file or the store as well as an address.
        let id = controller.router_id_for(target, &inventory)?;
        let pending = controller.query(&id)?.into_iter().collect();
        (pending, controller.store().audit_for(&id)?)
    };

    if ctx.json {
        print_json(&StatusOutput { pending, history })?;
        return Ok(true);
    }

    if pending.is_empty() {
        println!("No pending commits.");
    } else {
        print_table(
            &[
                "ROUTER", "HOSTNAME", "STATE", "DIGEST", "APPLIED", "DEADLINE", "REMAINING",
            ],
            pending_rows(&pending, Utc::now()),
        );
    }

    if !history.is_empty() {
        println!();
        let rows = history
            .iter()
            .map(|a| {
                vec![
                    timestamp(a.at),
                    a.event.to_string(),
                    a.state.to_string(),
                    a.digest.chars().take(12).collect(),
                    a.message.clone().unwrap_or_default(),
                ]
            })
            .collect();
        print_table(&["AT", "EVENT", "STATE", "DIGEST", "MESSAGE"], rows);
    }
    Ok(true)
}
