//! Builds a unit circle as a parametric curve, then demonstrates the three
//! computations the engine keeps consistent: exact evaluation, sound bounds
//! over a parameter box, and symbolic differentiation, plus an affine
//! transform turning the circle into an ellipse.
//!
//! Run with: `cargo run --example circle`

use std::f64::consts::{FRAC_PI_2, TAU};

use nalgebra::{DMatrix, DVector};
use paramexpr::prelude::*;

fn main() {
    // circle(t) = (cos t, sin t)
    let t = Expression::t();
    let circle = Expression::concatenated(&cos(&t), &sin(&t)).unwrap();

    println!("circle structure:\n{}\n", circle.describe());

    let quarter = circle.evaluate_at(&[FRAC_PI_2]).unwrap();
    println!("circle(pi/2) = ({:.3}, {:.3})", quarter[0], quarter[1]);

    // Bounds over the first quadrant of parameter space.
    let bounds = circle
        .bounds_over(&[Interval::new(0.0, FRAC_PI_2)])
        .unwrap();
    println!("bounds over [0, pi/2]: x in {}, y in {}", bounds[0], bounds[1]);

    // Bounds over a full turn collapse to the unit square.
    let full = circle.bounds_over(&[Interval::new(0.0, TAU)]).unwrap();
    println!("bounds over a full turn: x in {}, y in {}", full[0], full[1]);

    // The tangent is the symbolic derivative, itself a curve.
    let tangent = circle.derivative(0).unwrap();
    let direction = tangent.evaluate_at(&[0.0]).unwrap();
    println!(
        "tangent at t = 0: ({:.3}, {:.3})",
        direction[0], direction[1]
    );

    // Stretch x by 2 and shift right by 1: an ellipse centered at (1, 0).
    let stretch = DMatrix::from_column_slice(2, 2, &[2.0, 0.0, 0.0, 1.0]);
    let shift = DVector::from_column_slice(&[1.0, 0.0]);
    let ellipse = circle.transformed(&stretch, &shift).unwrap();
    let start = ellipse.evaluate_at(&[0.0]).unwrap();
    println!("ellipse(0) = ({:.3}, {:.3})", start[0], start[1]);

    // Batched evaluation: sample the ellipse at eight parameter values.
    let samples: Vec<f64> = (0..8).map(|i| i as f64 * TAU / 8.0).collect();
    let points = ellipse.evaluate(&points_block(1, &samples)).unwrap();
    println!("\nellipse samples:");
    for column in 0..points.ncols() {
        println!(
            "  t = {:>5.2} -> ({:>6.3}, {:>6.3})",
            samples[column],
            points[(0, column)],
            points[(1, column)]
        );
    }
}
