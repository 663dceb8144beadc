// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # Basic Governor Example
//!
//! Walks an agent through the full authorize / record cycle using the
//! in-memory audit log.  Run with:
//!
//! ```bash
//! RUST_LOG=agent_governor=info cargo run --example basic
//! ```

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use agent_governor_core::{
    audit::{AuditFilter, MemoryAuditLog},
    budget::TracingAlertSink,
    clock::MonotonicClock,
    config::GovernorConfig,
    governor::Governor,
    types::{Action, Decision, Outcome, PermissionTier},
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Agent Governor: Basic Example\n");

    // -----------------------------------------------------------------------
    // 1. Construct the governor
    // -----------------------------------------------------------------------
    let audit = Arc::new(MemoryAuditLog::new());
    let config = GovernorConfig {
        budget_cap: 1.0,
        ..GovernorConfig::default()
    };
    let governor = Governor::new(
        config,
        Arc::new(MonotonicClock::new()),
        audit.clone(),
        Arc::new(TracingAlertSink),
    )?;

    // -----------------------------------------------------------------------
    // 2. Register principals
    // -----------------------------------------------------------------------
    governor.register_principal("agent-builder", PermissionTier::Autonomous)?;
    governor.register_principal("agent-reviewer", PermissionTier::ReadOnly)?;
    println!("Registered agent-builder (autonomous) and agent-reviewer (read-only)\n");

    // -----------------------------------------------------------------------
    // 3. Evaluate actions
    // -----------------------------------------------------------------------
    let attempts = [
        ("agent-builder", Action::new("bash", "git status", 0.01)?),
        ("agent-builder", Action::new("bash", "ls src; rm -rf target", 0.01)?),
        ("agent-builder", Action::new("read", "config/../.env", 0.0)?),
        ("agent-builder", Action::new("write", "src/lib.rs", 0.2)?),
        ("agent-reviewer", Action::new("write", "src/lib.rs", 0.2)?),
        ("agent-reviewer", Action::new("bash", "echo $(cat secrets)", 0.0)?),
    ];

    for (principal, action) in &attempts {
        let decision = governor.authorize(principal, action)?;
        println!("{principal:<15} {:<40} -> {}", action.summary(), describe(&decision));
        if decision.is_allowed() {
            let actual_cost = action.estimated_cost();
            governor.record(principal, action, Outcome::Succeeded { actual_cost })?;
        }
    }
    println!();

    // -----------------------------------------------------------------------
    // 4. Spend past the alert thresholds
    // -----------------------------------------------------------------------
    for index in 0..4 {
        let action = Action::new("bash", &format!("cat notes-{index}.md"), 0.2)?;
        let decision = governor.authorize("agent-builder", &action)?;
        println!("spend #{index}: {}", describe(&decision));
        if decision.is_allowed() {
            governor.record("agent-builder", &action, Outcome::Succeeded { actual_cost: 0.2 })?;
        }
    }
    println!(
        "agent-builder spent {:.2} of 1.00\n",
        governor.ledger().spent("agent-builder", "default")
    );

    // -----------------------------------------------------------------------
    // 5. Query the audit trail
    // -----------------------------------------------------------------------
    let denials = audit.query(&AuditFilter {
        denials_only: true,
        ..AuditFilter::default()
    });
    println!("Audit log: {} records, {} denials", audit.len(), denials.len());
    for record in &denials {
        println!("  [{}] {} {}", record.event.principal, record.event.label(), record.event.target);
    }
    println!("Chain intact: {}", audit.verify());

    Ok(())
}

fn describe(decision: &Decision) -> String {
    match decision {
        Decision::Allow => "ALLOW".into(),
        Decision::Deny { reason } => format!("DENY ({reason})"),
        Decision::RequiresApproval { reason, risk } => format!("APPROVAL ({risk} risk): {reason}"),
    }
}
