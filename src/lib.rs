//! A minimal library for training small feed-forward classifiers with a PyTorch-like API.
//!
//! The pieces are deliberately swappable: anything implementing [`nn::Module`],
//! [`loss::Loss`], [`optim::Optim`] and [`dataloader::BatchSource`] can be driven by
//! [`train::train_loop`].

pub mod backprop_fns;
pub mod dataloader;
pub mod datasets;
pub mod graph;
pub mod loss;
pub mod metrics;
pub mod mnist;
pub mod nn;
pub mod optim;
pub mod tensor;
pub mod train;
pub mod values;
