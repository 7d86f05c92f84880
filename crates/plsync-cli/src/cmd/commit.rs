use plsync_core::controller::ConfirmTarget;

use super::Context;
use crate::output::print_report;

pub fn parse_target(arg: &str) -> ConfirmTarget {
    if arg.eq_ignore_ascii_case("all") {
        ConfirmTarget::All
    } else {
        ConfirmTarget::Router(arg.to_string())
    }
}

pub fn run(ctx: &Context, target: &str) -> anyhow::Result<bool> {
    let inventory = ctx.load_inventory_if_present()?;
    let controller = ctx.open_controller()?;
    let report = controller.confirm(&parse_target(target), &inventory)?;
    print_report(&report, ctx.json)?;
    Ok(!report.has_failures())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_case_insensitive() {
        assert_eq!(parse_target("all"), ConfirmTarget::All);
        assert_eq!(parse_target("ALL"), ConfirmTarget::All);
        assert_eq!(
            parse_target("192.168.1.1"),
            ConfirmTarget::Router("192.168.1.1".into())
        );
    }
}
