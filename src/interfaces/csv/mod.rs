pub mod entry_writer;
pub mod replay;
pub mod scenario_reader;
