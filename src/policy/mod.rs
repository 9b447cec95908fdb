use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::crypto::keys::KeyRing;
use crate::errors::{EngineError, EngineResult};
use crate::model::delegation::{consent_proof_binding_string, decode_consent_proof};
use crate::model::{ConsentTier, Policy, SettlementPreferences, SwapIntent, TrustConstraints, UserConsent, ValueBand};

/// Which of the four/five orthogonal consent checks are enforced. The
/// strongest combination is the engine default; weaker combinations are
/// exposed purely as configuration knobs. `validate` rejects nonsensical
/// combinations at startup.
#[derive(Debug, Clone, Copy)]
pub struct ConsentEnforcementFlags {
    pub require_tier: bool,
    pub require_binding: bool,
    pub require_signature: bool,
    pub require_replay: bool,
    pub require_challenge: bool,
}

impl Default for ConsentEnforcementFlags {
    fn default() -> Self {
        ConsentEnforcementFlags {
            require_tier: true,
            require_binding: true,
            require_signature: true,
            require_replay: true,
            require_challenge: false,
        }
    }
}

impl ConsentEnforcementFlags {
    pub fn validate(&self) -> Result<(), String> {
        if self.require_replay && !self.require_signature {
            return Err("replay enforcement requires signature enforcement".to_string());
        }
        if self.require_challenge && !self.require_binding {
            return Err("challenge enforcement requires binding enforcement".to_string());
        }
        Ok(())
    }
}

/// Rejects against `delegation.policy` value-band, cycle-length, and
/// escrow-preference bounds for a single intent.
pub fn check_intent_policy(
    policy: &Policy,
    value_band: &ValueBand,
    trust_constraints: &TrustConstraints,
    settlement_preferences: &SettlementPreferences,
) -> EngineResult<()> {
    let max_usd = value_band.active_max();
    if max_usd > policy.max_value_per_swap_usd {
        return Err(EngineError::ConstraintViolation {
            message: format!(
                "value_band.max_usd {max_usd} exceeds policy max_value_per_swap_usd {}",
                policy.max_value_per_swap_usd
            ),
        });
    }
    if trust_constraints.max_cycle_length > policy.max_cycle_length {
        return Err(EngineError::ConstraintViolation {
            message: format!(
                "trust_constraints.max_cycle_length {} exceeds policy max_cycle_length {}",
                trust_constraints.max_cycle_length, policy.max_cycle_length
            ),
        });
    }
    if policy.require_escrow && !settlement_preferences.require_escrow {
        return Err(EngineError::ConstraintViolation {
            message: "settlement_preferences.require_escrow contradicts policy.require_escrow".to_string(),
        });
    }
    Ok(())
}

/// Rejects a proposal against `delegation.policy` cycle-length and
/// confidence-score bounds.
pub fn check_proposal_policy(policy: &Policy, participants_len: usize, confidence_score: f64) -> EngineResult<()> {
    if participants_len as u32 > policy.max_cycle_length {
        return Err(EngineError::ConstraintViolation {
            message: format!(
                "proposal has {participants_len} participants, exceeding policy max_cycle_length {}",
                policy.max_cycle_length
            ),
        });
    }
    if confidence_score < policy.min_confidence_score {
        return Err(EngineError::ConstraintViolation {
            message: format!(
                "confidence_score {confidence_score} below policy min_confidence_score {}",
                policy.min_confidence_score
            ),
        });
    }
    Ok(())
}

/// `active_max` for the daily-cap delta: an intent's `ValueBand::active_max`
/// while not cancelled, else zero. Unbounded intents count as `f64::MAX` so
/// an agent can't dodge the daily cap by omitting `value_band.max_usd`.
pub fn active_max_for_intent(intent: &SwapIntent) -> f64 {
    if intent.status == crate::model::IntentStatus::Cancelled {
        0.0
    } else {
        intent.value_band.active_max()
    }
}

/// True when `now`'s local minute-of-day in `tz` falls in
/// `[start, end)`, wrapping midnight when `start > end` and always
/// in-window when `start == end`.
pub fn is_within_quiet_hours(
    start: &str,
    end: &str,
    tz: &str,
    now: DateTime<Utc>,
) -> EngineResult<bool> {
    let tz: Tz = Tz::from_str(tz).map_err(|_| EngineError::ConstraintViolation {
        message: format!("invalid quiet_hours.tz {tz}"),
    })?;
    let start_min = parse_hhmm(start)?;
    let end_min = parse_hhmm(end)?;

    let local = now.with_timezone(&tz);
    let local_min = local.time().hour() as i32 * 60 + local.time().minute() as i32;

    if start_min == end_min {
        return Ok(true);
    }
    if start_min < end_min {
        Ok(local_min >= start_min && local_min < end_min)
    } else {
        Ok(local_min >= start_min || local_min < end_min)
    }
}

fn parse_hhmm(value: &str) -> EngineResult<i32> {
    let bad = || EngineError::ConstraintViolation {
        message: format!("invalid HH:MM clock value {value}"),
    };
    let (h, m) = value.split_once(':').ok_or_else(bad)?;
    let h: i32 = h.parse().map_err(|_| bad())?;
    let m: i32 = m.parse().map_err(|_| bad())?;
    if !(0..24).contains(&h) || !(0..60).contains(&m) {
        return Err(bad());
    }
    Ok(h * 60 + m)
}

/// Applies `delta` against `subject`'s spend for `day` (`YYYY-MM-DD`,
/// UTC), rejecting when the running total would exceed `cap`. Mutates
/// the map only on success.
pub fn apply_daily_cap(
    spend: &mut crate::store::PolicySpendDaily,
    subject: &str,
    day: &str,
    delta: f64,
    cap: f64,
) -> EngineResult<()> {
    let by_day = spend.entry(subject.to_string()).or_default();
    let used = by_day.get(day).copied().unwrap_or(0.0);
    let next = used + delta;
    if next > cap {
        return Err(EngineError::forbidden_with_code(
            format!("daily spend {next} would exceed cap {cap}"),
            "daily_cap_exceeded",
        ));
    }
    by_day.insert(day.to_string(), next);
    Ok(())
}

pub struct ConsentCheckInput<'a> {
    pub max_usd: f64,
    pub threshold_usd: f64,
    pub consent: Option<&'a UserConsent>,
    pub subject: &'a str,
    pub delegation_id: &'a str,
    pub intent_id: &'a str,
    pub operation_id: &'a str,
    pub now: DateTime<Utc>,
}

/// Evaluates the staged high-value consent checks. Only the flags set in
/// `flags` are enforced; callers construct `flags` from validated engine
/// config.
pub fn evaluate_high_value_consent(
    flags: &ConsentEnforcementFlags,
    ring: &KeyRing,
    replay_set: &mut HashSet<String>,
    input: &ConsentCheckInput,
) -> EngineResult<()> {
    if input.max_usd <= input.threshold_usd {
        return Ok(());
    }
    let consent = input
        .consent
        .ok_or_else(|| EngineError::forbidden_with_code("high-value operation requires user_consent", "consent_required"))?;

    let required_tier = if input.max_usd > input.threshold_usd * 1.5 {
        ConsentTier::Passkey
    } else {
        ConsentTier::StepUp
    };
    if flags.require_tier && !tier_satisfies(consent.consent_tier, required_tier) {
        return Err(EngineError::forbidden_with_code(
            "consent tier insufficient for operation value",
            "consent_tier_insufficient",
        ));
    }

    let body = decode_consent_proof(&consent.consent_proof)?;
    let max_usd_cents = (input.max_usd * 100.0).round() as i64;

    if flags.require_binding {
        let expected = crate::model::delegation::ConsentProofBody {
            consent_id: consent.consent_id.clone(),
            subject: input.subject.to_string(),
            delegation_id: input.delegation_id.to_string(),
            intent_id: input.intent_id.to_string(),
            max_usd_cents,
            nonce: body.nonce.clone(),
            operation_id: if flags.require_challenge {
                Some(input.operation_id.to_string())
            } else {
                None
            },
            challenge_id: if flags.require_challenge {
                consent.challenge_id.clone()
            } else {
                None
            },
            signature: body.signature.clone(),
        };
        if consent_proof_binding_string(&body) != consent_proof_binding_string(&expected) {
            return Err(EngineError::forbidden_with_code(
                "consent proof binding mismatch",
                "consent_binding_mismatch",
            ));
        }
    }

    if flags.require_signature {
        let signed = serde_json::json!({
            "consent_id": body.consent_id,
            "subject": body.subject,
            "delegation_id": body.delegation_id,
            "intent_id": body.intent_id,
            "max_usd_cents": body.max_usd_cents,
            "nonce": body.nonce,
            "operation_id": body.operation_id,
            "challenge_id": body.challenge_id,
        });
        ring.verify(&signed, &body.signature)?;
    }

    if flags.require_challenge {
        match (&body.operation_id, &body.challenge_id, &consent.challenge_id) {
            (Some(op), Some(ch), Some(presented_ch)) if op == input.operation_id && ch == presented_ch => {}
            _ => {
                return Err(EngineError::forbidden_with_code(
                    "consent proof challenge binding mismatch",
                    "consent_challenge_mismatch",
                ))
            }
        }
    }

    if flags.require_replay {
        let replay_key = format!(
            "{}|{}|{}|{}",
            consent.consent_id, input.subject, input.delegation_id, body.nonce
        );
        if !replay_set.insert(replay_key) {
            return Err(EngineError::forbidden_with_code(
                "consent proof nonce already used",
                "consent_proof_replayed",
            ));
        }
    }

    if let Some(approved_max) = consent.approved_max_usd {
        if approved_max < input.max_usd {
            return Err(EngineError::forbidden_with_code(
                "approved_max_usd below requested max_usd",
                "consent_limit_exceeded",
            ));
        }
    }
    if let Some(expires_at) = consent.expires_at {
        if input.now > expires_at {
            return Err(EngineError::forbidden_with_code("consent proof expired", "consent_expired"));
        }
    }

    Ok(())
}

fn tier_satisfies(presented: ConsentTier, required: ConsentTier) -> bool {
    match required {
        ConsentTier::StepUp => true,
        ConsentTier::Passkey => presented == ConsentTier::Passkey,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Actor, ActorType, Asset, IntentStatus, TimeConstraints};

    fn sample_policy() -> Policy {
        Policy {
            quiet_hours: None,
            max_value_per_swap_usd: 500.0,
            max_cycle_length: 3,
            min_confidence_score: 0.5,
            require_escrow: true,
            max_value_per_day_usd: Some(1000.0),
            high_value_consent_threshold_usd: 1000.0,
        }
    }

    #[test]
    fn intent_policy_rejects_value_band_over_cap() {
        let policy = sample_policy();
        let band = ValueBand {
            min_usd: None,
            max_usd: Some(600.0),
            pricing_source: None,
        };
        let trust = TrustConstraints {
            max_cycle_length: 2,
            min_counterparty_reliability: None,
        };
        let err = check_intent_policy(&policy, &band, &trust, &SettlementPreferences { require_escrow: true })
            .unwrap_err();
        assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
    }

    #[test]
    fn intent_policy_rejects_escrow_contradiction() {
        let policy = sample_policy();
        let band = ValueBand {
            min_usd: None,
            max_usd: Some(100.0),
            pricing_source: None,
        };
        let trust = TrustConstraints {
            max_cycle_length: 2,
            min_counterparty_reliability: None,
        };
        let err = check_intent_policy(&policy, &band, &trust, &SettlementPreferences { require_escrow: false })
            .unwrap_err();
        assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
    }

    #[test]
    fn proposal_policy_rejects_low_confidence() {
        let policy = sample_policy();
        let err = check_proposal_policy(&policy, 2, 0.1).unwrap_err();
        assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
    }

    #[test]
    fn quiet_hours_wraps_midnight() {
        let tz = "UTC";
        let late_night = chrono::DateTime::parse_from_rfc3339("2026-01-01T23:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(is_within_quiet_hours("22:00", "06:00", tz, late_night).unwrap());

        let midday = chrono::DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(!is_within_quiet_hours("22:00", "06:00", tz, midday).unwrap());
    }

    #[test]
    fn quiet_hours_equal_bounds_means_always_on() {
        let now = Utc::now();
        assert!(is_within_quiet_hours("08:00", "08:00", "UTC", now).unwrap());
    }

    #[test]
    fn quiet_hours_rejects_bad_clock_format() {
        let now = Utc::now();
        let err = is_within_quiet_hours("25:00", "06:00", "UTC", now).unwrap_err();
        assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
    }

    #[test]
    fn daily_cap_rejects_when_exceeded() {
        let mut spend = crate::store::PolicySpendDaily::new();
        apply_daily_cap(&mut spend, "user:u1", "2026-01-01", 400.0, 500.0).unwrap();
        let err = apply_daily_cap(&mut spend, "user:u1", "2026-01-01", 200.0, 500.0).unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[test]
    fn active_max_is_zero_when_cancelled() {
        let intent = SwapIntent {
            id: "i1".to_string(),
            actor: Actor::new(ActorType::User, "u1"),
            offer: vec![],
            want_spec: crate::model::WantSpec::Set { any_of: vec![] },
            value_band: ValueBand {
                min_usd: None,
                max_usd: Some(300.0),
                pricing_source: None,
            },
            trust_constraints: TrustConstraints {
                max_cycle_length: 2,
                min_counterparty_reliability: None,
            },
            time_constraints: TimeConstraints {
                expires_at: Utc::now(),
                urgency: None,
            },
            settlement_preferences: SettlementPreferences::default(),
            status: IntentStatus::Cancelled,
        };
        assert_eq!(active_max_for_intent(&intent), 0.0);
        let _ = Asset {
            platform: "steam".to_string(),
            app_id: "1".to_string(),
            context_id: "1".to_string(),
            asset_id: "1".to_string(),
            class_id: None,
            instance_id: None,
            metadata: None,
            proof: None,
        };
    }

    #[test]
    fn active_max_is_unbounded_not_zero_when_max_usd_is_none() {
        let intent = SwapIntent {
            id: "i1".to_string(),
            actor: Actor::new(ActorType::User, "u1"),
            offer: vec![],
            want_spec: crate::model::WantSpec::Set { any_of: vec![] },
            value_band: ValueBand { min_usd: None, max_usd: None, pricing_source: None },
            trust_constraints: TrustConstraints { max_cycle_length: 2, min_counterparty_reliability: None },
            time_constraints: TimeConstraints { expires_at: Utc::now(), urgency: None },
            settlement_preferences: SettlementPreferences::default(),
            status: IntentStatus::Active,
        };
        assert_eq!(active_max_for_intent(&intent), f64::MAX);
    }

    #[test]
    fn unbounded_value_band_does_not_bypass_the_per_swap_cap() {
        let policy = Policy {
            quiet_hours: None,
            max_value_per_swap_usd: 500.0,
            max_cycle_length: 4,
            min_confidence_score: 0.0,
            require_escrow: false,
            max_value_per_day_usd: None,
            high_value_consent_threshold_usd: 1_000.0,
        };
        let value_band = ValueBand { min_usd: None, max_usd: None, pricing_source: None };
        let trust_constraints = TrustConstraints { max_cycle_length: 2, min_counterparty_reliability: None };
        let settlement_preferences = SettlementPreferences::default();
        let err = check_intent_policy(&policy, &value_band, &trust_constraints, &settlement_preferences).unwrap_err();
        assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
    }

    #[test]
    fn flags_validate_rejects_replay_without_signature() {
        let flags = ConsentEnforcementFlags {
            require_tier: true,
            require_binding: true,
            require_signature: false,
            require_replay: true,
            require_challenge: false,
        };
        assert!(flags.validate().is_err());
    }
}
