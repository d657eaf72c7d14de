use super::FusedChunk;
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
  Filter,
  Redact,
  AuditOnly,
}

#[derive(Debug, Clone)]
pub struct Policy {
  pub allowed_channels: Option<Vec<String>>,
  pub max_age_days: Option<i64>,
  pub sensitive_patterns: Vec<(String, String)>,
  pub mode: PolicyMode,
}

impl Policy {
  pub fn with_default_patterns(mut self) -> Self {
    self.sensitive_patterns.push(("EMAIL".to_string(), EMAIL_PATTERN.to_string()));
    self.sensitive_patterns.push(("PHONE".to_string(), PHONE_PATTERN.to_string()));
    self
  }
}

const EMAIL_PATTERN: &str = r"[\w.+-]+@[\w-]+\.[\w.-]+";
const PHONE_PATTERN: &str = r"\+?\d[\d\- ]{8,}\d";

#[derive(Debug, Clone)]
pub struct AuditEntry {
  pub chunk_id: String,
  pub action: &'static str,
  pub violations: Vec<String>,
  pub checks_performed: Vec<&'static str>,
  pub timestamp: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EnforcedChunk {
  pub chunk: FusedChunk,
  pub redacted: bool,
}

/// §4.9's per-result check suite. `violations` is empty when every check
/// passes.
fn evaluate(chunk: &FusedChunk, policy: &Policy) -> (Vec<String>, Vec<&'static str>) {
  let mut violations = Vec::new();
  let mut checks = Vec::new();

  if let Some(allowed) = &policy.allowed_channels {
    checks.push("channel_authorization");
    if !allowed.contains(&chunk.channel_id) {
      violations.push("channel_not_allowed".to_string());
    }
  }

  if let Some(max_age) = policy.max_age_days {
    checks.push("age_authorization");
    let age_days = (Utc::now() - chunk.published_at).num_days();
    if age_days > max_age {
      violations.push("exceeds_max_age".to_string());
    }
  }

  checks.push("sensitive_content");
  for (kind, pattern) in &policy.sensitive_patterns {
    if let Ok(re) = regex::Regex::new(pattern) {
      if re.is_match(&chunk.text_or_preview) {
        violations.push(format!("sensitive_content:{kind}"));
      }
    }
  }

  (violations, checks)
}

fn redact(text: &str, policy: &Policy) -> String {
  let mut out = text.to_string();
  for (kind, pattern) in &policy.sensitive_patterns {
    if let Ok(re) = regex::Regex::new(pattern) {
      out = re.replace_all(&out, format!("[{kind} REDACTED]")).to_string();
    }
  }
  out
}

/// Applies channel/age/sensitive-content checks per §4.9, returning the
/// surviving (possibly redacted) chunks plus a full per-result audit trail
/// regardless of mode.
pub fn enforce(chunks: Vec<FusedChunk>, policy: &Policy) -> (Vec<EnforcedChunk>, Vec<AuditEntry>) {
  let mut kept = Vec::new();
  let mut audit = Vec::new();

  for mut chunk in chunks {
    let (violations, checks) = evaluate(&chunk, policy);
    let has_violations = !violations.is_empty();

    let action = match (policy.mode, has_violations) {
      (PolicyMode::Filter, true) => "dropped",
      (PolicyMode::Redact, true) => "redacted",
      (PolicyMode::AuditOnly, true) => "retained_with_audit",
      (_, false) => "retained",
    };

    audit.push(AuditEntry {
      chunk_id: chunk.chunk_id.clone(),
      action,
      violations: violations.clone(),
      checks_performed: checks,
      timestamp: Utc::now(),
    });

    match (policy.mode, has_violations) {
      (PolicyMode::Filter, true) => continue,
      (PolicyMode::Redact, true) => {
        chunk.text_or_preview = redact(&chunk.text_or_preview, policy);
        kept.push(EnforcedChunk { chunk, redacted: true });
      }
      _ => kept.push(EnforcedChunk { chunk, redacted: false }),
    }
  }

  (kept, audit)
}
