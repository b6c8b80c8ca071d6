mod dedup;
mod fixtures;
mod query;
