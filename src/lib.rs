//! # Only NAS
//!
//! `only_nas`用纯rust实现基于权重共享的神经网络结构搜索（NAS）超网：
//! 一个超网同时编码了指数量级的候选结构，由 rollout 选出的候选网络直接复用超网中的共享权重，
//! 可以独立地训练、评估、求梯度，也可以在“虚拟上下文”中做试探性的更新而不改动共享权重。
//!

pub mod data;
pub mod errors;
pub mod nn;
pub mod search_space;
pub mod supernet;
pub mod tensor;
pub mod utils;
