pub mod prune_worker;
