//! Human-readable rendering of command results.

use std::fmt::Write as _;

use service::lock::LockInfo;
use service::operations::{HostStatus, RemoveReport, ServiceDetails, SetupReport};
use service::sequencer::{AccessoryOutcome, RolloutFailure, RolloutPlan, RolloutReport, ServiceOutcome};

fn accessory_line(out: &mut String, a: &AccessoryOutcome) {
    let _ = writeln!(out, "  accessory {:<12} {:<15} {} (ready after {} probe(s))", a.name, a.host, a.change.as_str(), a.attempts);
}

fn service_lines(out: &mut String, s: &ServiceOutcome) {
    for h in &s.hosts {
        let _ = writeln!(out, "  service   {:<12} {:<15} {}", s.service, h.host, h.change.as_str());
    }
    let route = if s.route_changed { "registered" } else { "unchanged" };
    let _ = writeln!(out, "  route     {:<12} {route}", s.service);
}

pub fn plan(plan: &RolloutPlan) -> String {
    let mut out = String::from("Rollout plan:\n");
    for (i, s) in plan.services.iter().enumerate() {
        let _ = writeln!(out, "{}. {} ({})", i + 1, s.config.service, s.config.image);
        for name in &s.boots {
            if let Some(acc) = plan.accessories.get(name) {
                let _ = writeln!(out, "   boot accessory {name} on {} ({})", acc.host, acc.config.image);
            }
        }
        let _ = writeln!(out, "   start on {}", s.config.servers.join(", "));
        let _ = writeln!(out, "   route {} -> {} via {}", s.route.display_route(), s.route.upstreams.join(", "), s.ingress);
    }
    out
}

pub fn report(report: &RolloutReport) -> String {
    let mut out = String::new();
    for a in &report.accessories {
        accessory_line(&mut out, a);
    }
    for s in &report.services {
        service_lines(&mut out, s);
    }
    if report.is_unchanged() {
        out.push_str("Nothing changed.\n");
    } else {
        let _ = writeln!(out, "Deployed {} service(s).", report.services.len());
    }
    out
}

pub fn setup(setup: &SetupReport) -> String {
    let mut out = String::new();
    for r in &setup.runtimes {
        let _ = writeln!(out, "  runtime   {:<28} docker {}", r.host, r.version);
    }
    out.push_str(&report(&setup.rollout));
    out
}

pub fn failure(f: &RolloutFailure) -> String {
    let mut out = String::new();
    for a in &f.accessories {
        accessory_line(&mut out, a);
    }
    for s in &f.completed {
        service_lines(&mut out, s);
    }
    match &f.service {
        Some(service) => {
            let done: Vec<&str> = f.completed.iter().map(|s| s.service.as_str()).collect();
            let _ = writeln!(out, "FAILED at {service}: {}", f.error);
            let _ = writeln!(
                out,
                "Completed before the failure (left running): {}",
                if done.is_empty() { "none".to_string() } else { done.join(", ") }
            );
        }
        None => {
            let _ = writeln!(out, "Rejected before any change: {}", f.error);
        }
    }
    out
}

fn status_line(out: &mut String, kind: &str, h: &HostStatus) {
    let state = match &h.state {
        Some(s) if s.running => format!("running ({})", s.image),
        Some(s) => format!("{} ({})", s.status, s.image),
        None => "absent".to_string(),
    };
    let current = if h.current { "current" } else { "outdated" };
    let _ = writeln!(out, "  {kind:<9} {:<12} {:<15} {state} [{current}]", h.container, h.host);
}

pub fn details(d: &ServiceDetails) -> String {
    let mut out = format!("{}:\n", d.service);
    for h in &d.hosts {
        status_line(&mut out, "container", h);
    }
    for a in &d.accessories {
        status_line(&mut out, "accessory", a);
    }
    match (&d.route, &d.route_error) {
        (Some(r), _) => {
            let _ = writeln!(out, "  route     {} -> {}", r.display_route(), r.upstreams.join(", "));
        }
        (None, Some(e)) => {
            let _ = writeln!(out, "  route     unknown ({e})");
        }
        (None, None) => out.push_str("  route     not registered\n"),
    }
    out
}

pub fn removed(service: &str, r: &RemoveReport) -> String {
    let mut out = format!("{service}: route {}\n", if r.route_removed { "removed" } else { "was not registered" });
    for (host, existed) in &r.containers {
        let _ = writeln!(out, "  container on {host}: {}", if *existed { "removed" } else { "absent" });
    }
    for (name, existed) in &r.accessories {
        let _ = writeln!(out, "  accessory {name}: {}", if *existed { "removed" } else { "absent" });
    }
    out
}

pub fn lock(target: &str, info: Option<&LockInfo>) -> String {
    match info {
        Some(l) => format!(
            "{target}: locked by {} (pid {}) since {}{}\n",
            l.holder,
            l.pid,
            l.acquired_at.to_rfc3339(),
            l.message.as_deref().map(|m| format!(": {m}")).unwrap_or_default()
        ),
        None => format!("{target}: unlocked\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service::errors::DeployError;
    use service::sequencer::{Change, HostOutcome};

    #[test]
    fn failure_names_service_and_completed_work() {
        let f = RolloutFailure {
            service: Some("api".into()),
            completed: vec![ServiceOutcome {
                service: "frontend".into(),
                hosts: vec![HostOutcome { host: "h1".into(), change: Change::Started }],
                route_changed: true,
            }],
            accessories: vec![],
            error: DeployError::DependencyTimeout { service: "api".into(), accessory: "db".into(), attempts: 30 },
        };
        let text = failure(&f);
        assert!(text.contains("FAILED at api"));
        assert!(text.contains("left running): frontend"));
        assert!(text.contains("`db`"));
    }

    #[test]
    fn unchanged_report_says_so() {
        let r = RolloutReport {
            accessories: vec![],
            services: vec![ServiceOutcome {
                service: "web".into(),
                hosts: vec![HostOutcome { host: "h1".into(), change: Change::Unchanged }],
                route_changed: false,
            }],
        };
        assert!(report(&r).ends_with("Nothing changed.\n"));
    }
}
