pub mod recalculate_totals_command;

pub use recalculate_totals_command::RecalculateTotalsCommand;
