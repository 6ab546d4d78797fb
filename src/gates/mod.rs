use anyhow::Result;
use dialoguer::{Select, theme::ColorfulTheme};

use crate::policy::all_policies_passed;
use crate::session::ExecutionPlan;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    Approved,
    Rejected,
    Aborted,
}

/// Asks whether a plan should run.
pub struct ApprovalGate {
    pub skip_all: bool,
}

impl ApprovalGate {
    pub fn new(skip_all: bool) -> Self {
        Self { skip_all }
    }

    pub fn check_plan(&self, plan: &ExecutionPlan) -> Result<GateDecision> {
        if !all_policies_passed(&plan.policy_results) {
            println!("  {}", console::style("Plan is blocked by policy").red());
            return Ok(GateDecision::Aborted);
        }
        if self.skip_all {
            println!("  {} (--yes flag)", console::style("Auto-approved").dim());
            return Ok(GateDecision::Approved);
        }
        self.prompt_user()
    }

    fn prompt_user(&self) -> Result<GateDecision> {
        let options = &[
            "Yes, execute this plan",
            "No, revise the plan",
            "Abort",
        ];

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Execute this plan?")
            .items(options)
            .default(0)
            .interact()?;

        Ok(match selection {
            0 => GateDecision::Approved,
            1 => GateDecision::Rejected,
            _ => GateDecision::Aborted,
        })
    }
}
