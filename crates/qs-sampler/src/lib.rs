pub mod greedy;
pub mod params;
pub mod sampler;
pub mod temperature;
pub mod top_k;
pub mod top_p;

pub use greedy::{DistSampler, GreedySampler};
pub use params::SamplingParams;
pub use sampler::{Sampler, SamplerChain, TokenLogit};
pub use temperature::TemperatureSampler;
pub use top_k::TopKSampler;
pub use top_p::TopPSampler;
