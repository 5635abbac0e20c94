pub mod population;

pub use population::{LeagueCommitments, PopulationStore};
