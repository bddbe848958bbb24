pub mod console;
pub mod fanout;
pub mod jsonl;
pub mod memory;
pub mod sink;
