//! Trains a feed-forward classifier using the library provided by `gradstep`
//!
//! # Usage
//! Runnable via
//! ```sh
//! cargo run -- -h
//! RUST_LOG=info cargo run -- --dataset moon
//! RUST_LOG=info cargo run --release -- --dataset mnist --data-dir ~/data/mnist --hidden-units 128,64
//! ```
//!
//! Supports a few 2-D datasets out of the box plus MNIST from IDX files, and allows custom
//! learning rate, momentum, batch size, etc.

use std::{error::Error, fs, path::PathBuf};

use gradstep::{
    dataloader::{BatchSource, DataLoader},
    datasets::{Dataset, load_dataset, plot_data, plot_decision_boundary, plot_losses},
    graph::draw_dot,
    loss::{CrossEntropyLoss, Loss},
    metrics::CrossEntropyMetric,
    mnist::{Mnist, Normalize},
    nn::{Module, Sequential},
    optim::SGD,
    train::{TrainConfig, TrainError, evaluate, train_loop},
};

use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

#[derive(Parser)]
#[command(about = "Train a small classifier with mini-batch SGD")]
struct Args {
    #[clap(short, long, default_value_t = Dataset::Xor)]
    dataset: Dataset,
    /// Directory holding the decompressed MNIST IDX files
    #[clap(long, default_value = "data/mnist")]
    data_dir: PathBuf,
    /// Samples per class for the generated datasets
    #[clap(short, long, default_value_t = 500)]
    class_size: usize,
    #[clap(short, long, default_value_t = 64)]
    batch_size: usize,
    #[clap(short, long, default_value_t = 5)]
    epochs: usize,
    #[clap(short, long, default_value_t = 0.01)]
    lr: f32,
    #[clap(short, long, default_value_t = 0.0)]
    momentum: f32,
    /// Hidden layer widths, comma separated
    #[clap(long, value_delimiter = ',', default_value = "16")]
    hidden_units: Vec<usize>,
    /// Batches whose gradients are summed before each optimizer step
    #[clap(long, default_value_t = 1)]
    grad_accumulation: usize,
    #[clap(short, long)]
    seed: Option<u64>,
    #[clap(short, long, default_value_t = format!("output"))]
    output_dir: String,
    /// Write the loss graph of the first batch as a graphviz file after training
    #[clap(long, default_value_t = false)]
    graphviz: bool,
    #[clap(long, default_value_t = false)]
    no_plots: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();
    let seed = args.seed.unwrap_or_else(|| rand::rng().random());
    log::info!("seed: {}", seed);
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let plots = !args.no_plots && args.dataset != Dataset::Mnist;
    if plots || args.graphviz {
        fs::create_dir_all(&args.output_dir)?;
    }

    let (data, labels, n_classes) = match load_dataset(args.dataset, args.class_size, &mut rng) {
        Some((data, labels)) => (data, labels, 2),
        None => {
            let mnist = Mnist::train(&args.data_dir, Normalize::default())?;
            (mnist.images, mnist.labels, Mnist::N_CLASSES)
        }
    };
    let n_features = data.first().map_or(0, Vec::len);
    log::info!(
        "dataset {}: {} samples, {} features, {} classes",
        args.dataset,
        data.len(),
        n_features,
        n_classes
    );

    if plots {
        plot_data(
            &data,
            &labels,
            &format!("{}/dataset_{}.png", args.output_dir, args.dataset),
            args.dataset,
        )?;
    }

    let model = Sequential::mlp(n_features, &args.hidden_units, n_classes, &mut rng)?;
    log::info!(
        "model: {} layers, {} parameters",
        model.len(),
        model.parameters().len()
    );
    for (name, tensor) in model.named_parameters() {
        log::debug!("{}: {:?}", name, tensor.shape());
    }

    let criterion = CrossEntropyLoss::default();
    let mut optim = SGD::new(model.parameters(), args.lr, args.momentum);
    let mut loader =
        DataLoader::new(data.clone(), labels.clone(), args.batch_size, true)?.with_seed(seed);
    log::info!(
        "sgd: lr {}, momentum {}, {} parameters; {} samples of {} features in {} batches",
        optim.lr(),
        args.momentum,
        optim.n_params(),
        loader.n_samples(),
        loader.n_features(),
        loader.len()
    );
    let config = TrainConfig {
        epochs: args.epochs,
        grad_accumulation_steps: args.grad_accumulation,
    };

    let reports = train_loop(&model, &mut loader, &criterion, &mut optim, &config)?;
    for report in reports.iter() {
        println!("Training loss: {}", report.mean_loss);
    }
    let (accuracy, cross_entropy) = score(&model, &mut loader)?;
    println!(
        "Training accuracy: {:.2}%, cross entropy: {:.4}",
        accuracy * 100.0,
        cross_entropy
    );

    if args.dataset == Dataset::Mnist {
        let test = Mnist::test(&args.data_dir, Normalize::default())?;
        let mut test_loader = DataLoader::new(test.images, test.labels, args.batch_size, false)?;
        let (accuracy, cross_entropy) = score(&model, &mut test_loader)?;
        println!(
            "Test accuracy: {:.2}%, cross entropy: {:.4}",
            accuracy * 100.0,
            cross_entropy
        );
    }

    if args.graphviz {
        if let Some(batch) = loader.batches().next() {
            let logits = model.forward(&batch.inputs)?;
            let loss = criterion.compute(&logits, &batch.labels)?;
            loss.backward();
            draw_dot(
                &loss,
                format!("{}/loss_graph_{}.dot", args.output_dir, args.dataset),
            )?;
        }
    }

    if plots {
        plot_losses(
            &reports,
            &format!("{}/loss_{}.png", args.output_dir, args.dataset),
        )?;
        plot_decision_boundary(
            &model,
            &format!("{}/decision_boundary_{}.png", args.output_dir, args.dataset),
            args.dataset,
            &data,
            &labels,
        )?;
    }

    Ok(())
}

/// Accuracy and mean cross entropy of the predicted probabilities over `loader`
fn score<M, S>(model: &M, loader: &mut S) -> Result<(f32, f32), Box<dyn Error>>
where
    M: Module + ?Sized,
    S: BatchSource + ?Sized,
{
    let accuracy = evaluate(model, loader)?;
    let mut metric = CrossEntropyMetric::default();
    for batch in loader.batches() {
        let probs = model.forward(&batch.inputs)?.detach().softmax_rows()?;
        metric.update(&batch.labels, &probs)?;
    }
    let cross_entropy = metric.get().ok_or(TrainError::EmptyLoader)?;
    Ok((accuracy, cross_entropy))
}
