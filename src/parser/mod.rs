//! Output contracts: turning raw provider stdout into a [`ProviderResult`].
//!
//! Four modes cover the observed provider landscape: verbatim text, text
//! with opportunistic contract recognition, a trailing contract line after
//! free-form logging, and a mandatory JSON contract.

pub mod names;

mod contract;
mod nested;

pub use contract::{apply_declared_tools, normalize_tool_call, Contract};
pub use nested::{find_inner_tool_call, InnerToolCall};

use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::types::{FinishReason, OutputMode, ProviderResult};
use crate::util::truncate;

/// Parse child stdout according to the provider's declared output mode.
pub fn parse_output(mode: OutputMode, stdout: &str) -> Result<ProviderResult> {
    match mode {
        OutputMode::TextPlain => Ok(plain(stdout)),
        OutputMode::Text => Ok(soft_contract(stdout)),
        OutputMode::TextContractFinalLine => Ok(final_line_contract(stdout)),
        OutputMode::JsonContract => hard_contract(stdout),
    }
}

fn plain(stdout: &str) -> ProviderResult {
    ProviderResult {
        output_text: stdout.trim().to_string(),
        tool_calls: Vec::new(),
        finish_reason: FinishReason::Stop,
        raw: None,
    }
}

/// `text` mode: use the contract when one is recognizable, otherwise the
/// trimmed stdout verbatim.
fn soft_contract(stdout: &str) -> ProviderResult {
    match extract_contract(stdout) {
        Some(contract) if contract.has_contract_field() => contract.into_result(),
        _ => plain(stdout),
    }
}

/// `text_contract_final_line` mode: the last non-empty line may carry the
/// contract; anything else falls back to plain text.
fn final_line_contract(stdout: &str) -> ProviderResult {
    let Some(line) = stdout.lines().rev().find(|line| !line.trim().is_empty()) else {
        return plain(stdout);
    };
    match serde_json::from_str::<Value>(line.trim()) {
        Ok(value) => match Contract::from_value(&value) {
            Some(contract) if contract.has_contract_field() => contract.into_result(),
            _ => plain(stdout),
        },
        Err(_) => plain(stdout),
    }
}

/// `json_contract` mode: stdout must contain a JSON object.
fn hard_contract(stdout: &str) -> Result<ProviderResult> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::Parse("empty stdout".to_string()));
    }
    extract_contract(stdout)
        .map(Contract::into_result)
        .ok_or_else(|| {
            GatewayError::Parse(format!(
                "no JSON object found in: {}",
                truncate(trimmed, 200)
            ))
        })
}

/// Try the whole trimmed stdout first, then scan lines bottom-up for the
/// first parsable JSON object.
fn extract_contract(stdout: &str) -> Option<Contract> {
    let trimmed = stdout.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(contract) = Contract::from_value(&value) {
            return Some(contract);
        }
    }
    for line in trimmed.lines().rev() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(line) {
            if let Some(contract) = Contract::from_value(&value) {
                return Some(contract);
            }
        }
    }
    None
}
