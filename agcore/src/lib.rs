// data module
pub mod data {
    pub mod measurement;
    pub mod tree;
}

// model module
pub mod model {
    pub mod state;
    pub mod spatial;
    pub mod likelihood;
    pub mod partition;
    pub mod prior;
}

// algorithm module
pub mod algorithm {
    pub mod stats;
}
