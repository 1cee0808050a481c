//! Admission control: decides whether a connect proceeds and with which
//! capabilities.
//!
//! Rules run in a fixed order — ban list, password (admin IPs bypass),
//! global session cap, per-IP session cap, IQ mode gate — and the first
//! failing rule produces the decision. Admitted connects hold an
//! [`AdmissionPermit`] whose drop releases both counters, so the
//! invariant `sum(per_ip_active) == global_active` holds at quiescence.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::state::AdmissionConfig;
use crate::tuning::Mode;

/// Outcome of an admission check, also the `/connection` response body.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub reason: String,
    pub client_ip: String,
    pub session_timeout: u64,
    pub max_session_time: u64,
    pub bypassed: bool,
    pub allowed_iq_modes: Vec<String>,
}

/// Everything a connect attempt presents to the policy.
#[derive(Debug, Clone)]
pub struct ConnectRequest<'a> {
    pub ip: IpAddr,
    pub password: Option<&'a str>,
    /// Requested mode, when known (the `/connection` pre-check may omit it).
    pub mode: Option<Mode>,
}

/// Process-wide admission state.
#[derive(Debug)]
pub struct AdmissionControl {
    config: AdmissionConfig,
    global_active: AtomicUsize,
    per_ip_active: DashMap<IpAddr, usize>,
}

impl AdmissionControl {
    /// Creates the control with zeroed counters.
    #[must_use]
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            global_active: AtomicUsize::new(0),
            per_ip_active: DashMap::new(),
        }
    }

    /// Active sessions across all IPs.
    #[must_use]
    pub fn global_active(&self) -> usize {
        self.global_active.load(Ordering::SeqCst)
    }

    /// Active sessions for one IP.
    #[must_use]
    pub fn active_for(&self, ip: IpAddr) -> usize {
        self.per_ip_active.get(&ip).map(|e| *e.value()).unwrap_or(0)
    }

    /// Sum of the per-IP counters (equals the global counter at rest).
    #[must_use]
    pub fn per_ip_sum(&self) -> usize {
        self.per_ip_active.iter().map(|e| *e.value()).sum()
    }

    fn decision(&self, request: &ConnectRequest<'_>, allowed: bool, reason: &str, bypassed: bool) -> AdmissionDecision {
        let mut allowed_iq_modes: Vec<String> =
            self.config.allowed_iq_modes.iter().cloned().collect();
        allowed_iq_modes.sort();
        AdmissionDecision {
            allowed,
            reason: reason.to_string(),
            client_ip: request.ip.to_string(),
            session_timeout: self.config.session_timeout_s,
            max_session_time: self.config.max_session_s,
            bypassed,
            allowed_iq_modes,
        }
    }

    /// Evaluates the stateless rules (everything except the caps).
    ///
    /// Returns `Ok(bypassed)` when they pass.
    fn check_static(&self, request: &ConnectRequest<'_>) -> Result<bool, &'static str> {
        if self.config.banned_ips.contains(&request.ip) {
            return Err("banned");
        }
        let bypassed = self.config.admin_ips.contains(&request.ip);
        if !bypassed {
            if let Some(required) = &self.config.password {
                if request.password != Some(required.as_str()) {
                    return Err("password");
                }
            }
        }
        if let Some(mode) = request.mode {
            if mode.is_iq() && !self.config.allowed_iq_modes.contains(mode.as_str()) {
                return Err("iq mode not allowed");
            }
        }
        Ok(bypassed)
    }

    /// Pre-check for `POST /connection`: runs every rule, including a
    /// non-reserving look at the caps, without taking a permit.
    #[must_use]
    pub fn check(&self, request: &ConnectRequest<'_>) -> AdmissionDecision {
        let bypassed = match self.check_static(request) {
            Ok(b) => b,
            Err(reason) => return self.decision(request, false, reason, false),
        };
        if self.global_active() >= self.config.max_sessions {
            return self.decision(request, false, "server full", bypassed);
        }
        if self.active_for(request.ip) >= self.config.max_sessions_per_ip {
            return self.decision(request, false, "too many sessions from this ip", bypassed);
        }
        self.decision(request, true, "", bypassed)
    }

    /// Full admission at WebSocket upgrade: evaluates the rules and, when
    /// they pass, reserves one global and one per-IP slot.
    pub fn admit(
        self: &Arc<Self>,
        request: &ConnectRequest<'_>,
    ) -> Result<AdmissionPermit, AdmissionDecision> {
        let bypassed = match self.check_static(request) {
            Ok(b) => b,
            Err(reason) => return Err(self.decision(request, false, reason, false)),
        };

        // Reserve the global slot with a bounded fetch_update.
        let cap = self.config.max_sessions;
        if self
            .global_active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < cap).then_some(n + 1)
            })
            .is_err()
        {
            return Err(self.decision(request, false, "server full", bypassed));
        }

        // Reserve the per-IP slot under the entry lock; same-IP races
        // serialize on the map shard.
        let per_ip_ok = {
            let mut entry = self.per_ip_active.entry(request.ip).or_insert(0);
            if *entry < self.config.max_sessions_per_ip {
                *entry += 1;
                true
            } else {
                false
            }
        };
        if !per_ip_ok {
            self.global_active.fetch_sub(1, Ordering::SeqCst);
            return Err(self.decision(request, false, "too many sessions from this ip", bypassed));
        }

        log::info!(
            "[Admission] {} admitted (global {}/{}, ip {}/{})",
            request.ip,
            self.global_active(),
            cap,
            self.active_for(request.ip),
            self.config.max_sessions_per_ip
        );
        Ok(AdmissionPermit {
            control: Arc::clone(self),
            ip: request.ip,
            decision: self.decision(request, true, "", bypassed),
        })
    }

    fn release(&self, ip: IpAddr) {
        self.global_active.fetch_sub(1, Ordering::SeqCst);
        if let Some(mut entry) = self.per_ip_active.get_mut(&ip) {
            *entry.value_mut() = entry.value().saturating_sub(1);
        }
        // Drop empty entries so the map tracks distinct active IPs only.
        self.per_ip_active.remove_if(&ip, |_, &count| count == 0);
    }
}

/// One admitted connection's reservation. Dropping it releases both
/// counters.
#[derive(Debug)]
pub struct AdmissionPermit {
    control: Arc<AdmissionControl>,
    ip: IpAddr,
    decision: AdmissionDecision,
}

impl AdmissionPermit {
    /// The decision that granted this permit.
    #[must_use]
    pub fn decision(&self) -> &AdmissionDecision {
        &self.decision
    }

    /// Client IP this permit counts against.
    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.control.release(self.ip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(configure: impl FnOnce(&mut AdmissionConfig)) -> Arc<AdmissionControl> {
        let mut config = AdmissionConfig::default();
        configure(&mut config);
        Arc::new(AdmissionControl::new(config))
    }

    fn request(ip: &str) -> ConnectRequest<'static> {
        ConnectRequest {
            ip: ip.parse().unwrap(),
            password: None,
            mode: None,
        }
    }

    #[test]
    fn banned_ip_is_refused_first() {
        let control = control(|c| {
            c.banned_ips.insert("10.0.0.9".parse().unwrap());
            c.password = Some("secret".into());
        });
        let decision = control.check(&ConnectRequest {
            password: Some("secret"),
            ..request("10.0.0.9")
        });
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "banned");
    }

    #[test]
    fn wrong_password_is_refused() {
        let control = control(|c| c.password = Some("secret".into()));
        let decision = control.check(&ConnectRequest {
            password: Some("wrong"),
            ..request("10.0.0.1")
        });
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "password");

        let ok = control.check(&ConnectRequest {
            password: Some("secret"),
            ..request("10.0.0.1")
        });
        assert!(ok.allowed);
    }

    #[test]
    fn admin_ip_bypasses_password() {
        let control = control(|c| {
            c.password = Some("secret".into());
            c.admin_ips.insert("10.0.0.2".parse().unwrap());
        });
        let decision = control.check(&request("10.0.0.2"));
        assert!(decision.allowed);
        assert!(decision.bypassed);
    }

    #[test]
    fn iq_gate_refuses_unlisted_mode() {
        let control = control(|c| {
            c.allowed_iq_modes = ["iq96".to_string()].into_iter().collect();
        });
        let decision = control.check(&ConnectRequest {
            mode: Some(Mode::Iq48),
            ..request("10.0.0.3")
        });
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "iq mode not allowed");

        // Audio modes are never gated.
        let audio = control.check(&ConnectRequest {
            mode: Some(Mode::Usb),
            ..request("10.0.0.3")
        });
        assert!(audio.allowed);
    }

    #[test]
    fn global_cap_is_enforced() {
        let control = control(|c| {
            c.max_sessions = 2;
            c.max_sessions_per_ip = 2;
        });
        let a = control.admit(&request("10.0.0.1")).unwrap();
        let _b = control.admit(&request("10.0.0.2")).unwrap();
        let refused = control.admit(&request("10.0.0.3")).unwrap_err();
        assert_eq!(refused.reason, "server full");

        drop(a);
        assert!(control.admit(&request("10.0.0.3")).is_ok());
    }

    #[test]
    fn per_ip_cap_is_enforced_and_released() {
        let control = control(|c| {
            c.max_sessions = 10;
            c.max_sessions_per_ip = 1;
        });
        let permit = control.admit(&request("10.0.0.4")).unwrap();
        let refused = control.admit(&request("10.0.0.4")).unwrap_err();
        assert_eq!(refused.reason, "too many sessions from this ip");
        // The failed attempt must not leak the global slot.
        assert_eq!(control.global_active(), 1);

        drop(permit);
        assert_eq!(control.global_active(), 0);
        assert!(control.admit(&request("10.0.0.4")).is_ok());
    }

    #[test]
    fn counters_are_conserved() {
        let control = control(|c| {
            c.max_sessions = 8;
            c.max_sessions_per_ip = 4;
        });
        let mut permits = Vec::new();
        for ip in ["10.0.0.1", "10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            permits.push(control.admit(&request(ip)).unwrap());
        }
        assert_eq!(control.global_active(), 4);
        assert_eq!(control.per_ip_sum(), control.global_active());

        permits.truncate(1);
        assert_eq!(control.global_active(), 1);
        assert_eq!(control.per_ip_sum(), control.global_active());
    }
}
