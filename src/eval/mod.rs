mod eval_flag;
mod eval_prerequisites;
mod eval_rules;
mod eval_segments;
mod evaluator;

pub mod eval_details;

pub use evaluator::{Evaluator, EvaluatorConfig};
