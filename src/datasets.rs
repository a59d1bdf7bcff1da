//! Generates binary classification datasets and utilities for plotting them, decision
//! boundaries and training curves
//!
//! By convention class 0 is plotted in red and class 1 is plotted in blue.

use crate::{nn::Module, tensor::Tensor, train::EpochReport};
use std::{
    error::Error,
    f32::consts::PI,
    fmt::{self, Display},
};

use clap::ValueEnum;
use plotters::{
    chart::ChartBuilder,
    prelude::{BitMapBackend, Circle, IntoDrawingArea, Rectangle},
    series::LineSeries,
    style::{BLUE, Color, RED, RGBColor, WHITE},
};
use rand::Rng;

/// Toggles between dataset types
#[derive(Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Line,
    Circle,
    Xor,
    Moon,
    /// Handwritten digits read from IDX files, see [`crate::mnist`]
    Mnist,
}

impl Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dataset::Line => write!(f, "line"),
            Dataset::Circle => write!(f, "circle"),
            Dataset::Xor => write!(f, "xor"),
            Dataset::Moon => write!(f, "moon"),
            Dataset::Mnist => write!(f, "mnist"),
        }
    }
}

/// Points in the plane with their class index
pub type Points = (Vec<Vec<f32>>, Vec<usize>);

/// Generates one of the 2-D datasets, `None` for datasets which are read from disk
pub fn load_dataset<R: Rng + ?Sized>(
    dataset: Dataset,
    class_size: usize,
    rng: &mut R,
) -> Option<Points> {
    match dataset {
        Dataset::Line => Some(gen_linear_data(class_size, rng)),
        Dataset::Circle => Some(gen_circle_data(class_size, rng)),
        Dataset::Xor => Some(gen_xor_data(class_size, rng)),
        Dataset::Moon => Some(gen_moon_data(class_size, rng)),
        Dataset::Mnist => None,
    }
}

/// Generates a simple linearly separable dataset
pub fn gen_linear_data<R: Rng + ?Sized>(class_size: usize, rng: &mut R) -> Points {
    let mut data = Vec::new();
    let mut labels = Vec::new();

    for _ in 0..class_size {
        let x = rng.random_range(-5.0..5.0);
        let y = rng.random_range(-5.0..5.0);
        data.push(vec![x, y]);
        labels.push(if x > y { 0 } else { 1 });
    }

    (data, labels)
}

/// Generates a binary classification dataset of two concentric circles
pub fn gen_circle_data<R: Rng + ?Sized>(class_size: usize, rng: &mut R) -> Points {
    let mut data = Vec::new();
    let mut labels = Vec::new();

    for (class, radius) in [(0, 3.0f32), (1, 5.0f32)] {
        for _ in 0..class_size {
            let angle = rng.random_range(0.0..2.0 * PI);
            let radius = radius + radius * rng.random_range(-0.25..0.25);
            data.push(vec![radius * angle.cos(), radius * angle.sin()]);
            labels.push(class);
        }
    }

    (data, labels)
}

pub fn gen_xor_data<R: Rng + ?Sized>(class_size: usize, rng: &mut R) -> Points {
    let mut data = Vec::new();
    let mut labels = Vec::new();

    for _ in 0..class_size {
        let x: f32 = rng.random_range(-5.0..5.0);
        let y: f32 = rng.random_range(-5.0..5.0);
        data.push(vec![x, y]);
        labels.push(if x * y > 0.0 { 0 } else { 1 });
    }

    (data, labels)
}

/// Generates a moons dataset (two interleaving partial circles) for binary classification
pub fn gen_moon_data<R: Rng + ?Sized>(class_size: usize, rng: &mut R) -> Points {
    let mut data = Vec::new();
    let mut labels = Vec::new();
    let radius = 3.0;

    for class in [0, 1] {
        for _ in 0..class_size {
            let theta: f32 = rng.random_range(PI * -1.0 / 4.0..PI * 5.0 / 4.0);
            let (x, y) = if class == 0 {
                (radius * theta.cos(), radius * theta.sin())
            } else {
                (radius * theta.cos() + 2.0, -radius * theta.sin() - 0.2)
            };
            let noise_x = rng.random_range(-0.1..0.1);
            let noise_y = rng.random_range(-0.1..0.1);
            data.push(vec![x + noise_x, y + noise_y]);
            labels.push(class);
        }
    }

    (data, labels)
}

/// Plots the data points and labels for a given dataset
pub fn plot_data(
    data: &[Vec<f32>],
    labels: &[usize],
    file_name: &str,
    dataset: Dataset,
) -> Result<(), Box<dyn Error>> {
    let root_area = BitMapBackend::new(file_name, (640, 480)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root_area)
        .caption(format!("Dataset: {}", dataset), ("sans-serif", 50))
        .margin(20)
        .x_label_area_size(30)
        .y_label_area_size(30)
        .build_cartesian_2d(-6.0f32..6.0f32, -6.0f32..6.0f32)?;

    chart.configure_mesh().draw()?;

    chart.draw_series(data.iter().zip(labels.iter()).map(|(point, label)| {
        let color = if *label == 0 { RED } else { BLUE };
        Circle::new((point[0], point[1]), 3, color.filled())
    }))?;

    root_area.present()?;
    log::info!("Data plot has been saved to '{}'.", file_name);

    Ok(())
}

/// Plots the decision boundary for a given model on a given dataset by sampling a grid of
/// points and evaluating the model
pub fn plot_decision_boundary(
    model: &dyn Module,
    file_name: &str,
    dataset: Dataset,
    data: &[Vec<f32>],
    labels: &[usize],
) -> Result<(), Box<dyn Error>> {
    let root_area = BitMapBackend::new(file_name, (640, 480)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let grid_min = -6.0f32;
    let grid_max = 6.0f32;

    let mut chart = ChartBuilder::on(&root_area)
        .caption(
            format!("Decision Boundary for {}", dataset),
            ("sans-serif", 50),
        )
        .margin(20)
        .x_label_area_size(30)
        .y_label_area_size(30)
        .build_cartesian_2d(grid_min..grid_max, grid_min..grid_max)?;

    chart.configure_mesh().draw()?;

    let red_bg = RGBColor(255, 200, 200);
    let blue_bg = RGBColor(200, 200, 255);

    let step = 0.20f32;
    let n_steps = ((grid_max - grid_min) / step).round() as usize;
    let grid_points = (0..n_steps)
        .flat_map(|xi| {
            let x = grid_min + (xi as f32 * step);
            (0..n_steps).map(move |yi| (x, grid_min + (yi as f32 * step)))
        })
        .collect::<Vec<_>>();

    // one forward pass over the whole grid
    let inputs = Tensor::new(
        grid_points.iter().flat_map(|(x, y)| [*x, *y]).collect(),
        &[grid_points.len(), 2],
    )?;
    let predictions = model.forward(&inputs)?.argmax_rows()?;

    chart.draw_series(grid_points.iter().zip(predictions).map(|((x, y), pred)| {
        let color = if pred == 0 { red_bg } else { blue_bg };
        Rectangle::new(
            [
                (x - step / 2.0, y - step / 2.0),
                (x + step / 2.0, y + step / 2.0),
            ],
            color.filled(),
        )
    }))?;

    // plot the data points
    chart.draw_series(data.iter().zip(labels.iter()).map(|(point, label)| {
        let color = if *label == 0 { RED } else { BLUE };
        Circle::new((point[0], point[1]), 3, color.filled())
    }))?;

    root_area.present()?;
    log::info!("Decision boundary plot saved to '{}'.", file_name);
    Ok(())
}

/// Plots the mean training loss of every epoch
pub fn plot_losses(reports: &[EpochReport], file_name: &str) -> Result<(), Box<dyn Error>> {
    let root_area = BitMapBackend::new(file_name, (640, 480)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let max_loss = reports
        .iter()
        .map(|r| r.mean_loss)
        .fold(0.0f32, f32::max)
        .max(f32::EPSILON);
    let n_epochs = reports.len().max(1) as f32;

    let mut chart = ChartBuilder::on(&root_area)
        .caption("Training loss", ("sans-serif", 40))
        .margin(20)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(1.0f32..n_epochs.max(2.0), 0.0f32..max_loss * 1.1)?;

    chart
        .configure_mesh()
        .x_desc("epoch")
        .y_desc("loss")
        .draw()?;

    chart.draw_series(LineSeries::new(
        reports.iter().map(|r| (r.epoch as f32, r.mean_loss)),
        &BLUE,
    ))?;

    root_area.present()?;
    log::info!("Loss curve saved to '{}'.", file_name);
    Ok(())
}
