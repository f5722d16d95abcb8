//! A single pipeline step.
//!
//! A [`PipelineStep`] is one natural-language instruction. Applying it to the
//! current document means sending `instruction + "\nInput: " + document` to
//! the text-generation backend.

use serde::{Deserialize, Serialize};

/// Separator between a step's instruction and the current state.
pub const REQUEST_DELIMITER: &str = "\nInput: ";

/// One instruction in a chain.
///
/// # Example
///
/// ```rust
/// use prompt_chain::PipelineStep;
///
/// let step = PipelineStep::new("uppercase the text");
/// assert_eq!(step.build_request("hello"), "uppercase the text\nInput: hello");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineStep {
    instruction: String,
}

impl PipelineStep {
    /// Create a step from its instruction text. Empty instructions are allowed.
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
        }
    }

    /// The instruction text.
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// The request sent to the backend for the given state.
    pub fn build_request(&self, state: &str) -> String {
        let mut request =
            String::with_capacity(self.instruction.len() + REQUEST_DELIMITER.len() + state.len());
        request.push_str(&self.instruction);
        request.push_str(REQUEST_DELIMITER);
        request.push_str(state);
        request
    }
}

impl From<String> for PipelineStep {
    fn from(instruction: String) -> Self {
        Self::new(instruction)
    }
}

impl From<&str> for PipelineStep {
    fn from(instruction: &str) -> Self {
        Self::new(instruction)
    }
}
