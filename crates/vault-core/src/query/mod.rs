pub mod compiler;
pub mod fields;
pub mod guards;
pub mod pagination;
pub mod parser;
pub mod planner;
pub mod predicate;
pub mod tokenizer;
