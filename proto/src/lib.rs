pub mod generated {
    pub mod dfs {
        include!("./generated/dfs.rs");
    }
}
