use std::env;
use std::path::Path;
use std::time::Instant;

use deconvolver::config::{load_config, DemoConfig};
use deconvolver::io::{load_grayscale_grid, psnr, save_grayscale_grid, write_json_file};
use deconvolver::prelude::*;
use deconvolver::{ConvolutionOperator, Grid, GridRegularizer, SolveOutcome};

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut args = env::args().skip(1);
    let config_path = args
        .next()
        .ok_or_else(|| "usage: deconvolve_demo <config.json>".to_string())?;
    let config = load_config(Path::new(&config_path))?;

    let truth = load_grayscale_grid(&config.input)?;
    let (radius, sigma) = config.kernel.resolve();
    let blur_op = ConvolutionOperator::gaussian2d(radius, sigma)
        .map_err(|e| format!("Failed to build kernel: {e}"))?;

    println!("Convolving");
    let mut blurred = blur_op
        .apply(&truth)
        .map_err(|e| format!("Convolution failed: {e}"))?;
    if config.noise_sigma > 0.0 {
        add_gaussian_noise(&mut blurred, config.noise_sigma, 0x5eed);
    }
    save_grayscale_grid(&config.output.blurred_path(), &blurred)?;

    println!("Deconvolving with method `{}`", config.method);
    let start = Instant::now();
    let outcome = solve(&config, &truth, &blurred, &blur_op)?;
    let total = start.elapsed().as_secs_f64();

    let report = &outcome.report;
    println!("Done: {:?} after {} iterations", report.status, report.iterations);
    println!("Total time:       {total:.2}s");
    println!("Iteration time:   {:.2}s", report.stats.iter_time);
    println!("Regularizer time: {:.2}s", report.stats.regularizer_time);
    println!("Data time:        {:.2}s", report.stats.data_time);
    println!("Unary time:       {:.2}s", report.stats.unary_time);
    println!("Final PSNR:       {:.2} dB", psnr(&outcome.estimate, &truth));

    save_grayscale_grid(&config.output.restored_path(), &outcome.estimate)?;
    if let Some(path) = config.output.report_path() {
        write_json_file(&path, report)?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

fn solve(
    config: &DemoConfig,
    truth: &Grid,
    blurred: &Grid,
    blur_op: &ConvolutionOperator,
) -> Result<SolveOutcome, String> {
    let method: Method = config
        .method
        .parse()
        .map_err(|e| format!("Bad method: {e}"))?;
    let (edge, num_labels, label_scale) = config.regularizer.resolve();
    let params = config.solver.clone();

    let mut progress = |u: &IterationUpdate| {
        println!(
            "  iter {:3}  dual {:12.1}  data {:12.1}  reg {:10.1}  smoothing {:6.2}  PSNR {:.2} dB",
            u.iteration,
            u.dual,
            u.primal_data,
            u.primal_reg,
            u.smoothing,
            psnr(u.estimate, truth)
        );
    };

    let outcome = match method {
        Method::Dual => {
            let mut reg =
                GridRegularizer::new(blurred.extents(), num_labels, label_scale, edge)
                    .map_err(|e| format!("Bad regularizer config: {e}"))?;
            DualSolver::new(params)
                .solve(blurred, blur_op, blur_op, &mut reg, &mut progress)
                .map_err(|e| format!("Solve failed: {e}"))?
        }
        Method::Primal => {
            let anneal = AnnealConfig {
                num_labels,
                label_scale,
                smooth: edge,
            };
            PrimalSolver::new(params)
                .solve(blurred, blur_op, blur_op, &anneal, &mut progress)
                .map_err(|e| format!("Solve failed: {e}"))?
        }
        Method::Bp => {
            let mut reg =
                GridRegularizer::new(blurred.extents(), num_labels, label_scale, edge)
                    .map_err(|e| format!("Bad regularizer config: {e}"))?;
            ConvexBpSolver::new(params)
                .solve(blurred, blur_op, blur_op, &mut reg, &mut progress)
                .map_err(|e| format!("Solve failed: {e}"))?
        }
    };
    Ok(outcome)
}

/// Seeded Box-Muller noise on top of the blurred observation. Noise lives
/// in the driver so the solver core stays deterministic.
fn add_gaussian_noise(grid: &mut Grid, sigma: f64, seed: u64) {
    let mut state = seed.max(1);
    let mut next = || {
        // xorshift64
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    let data = grid.data_mut();
    let mut i = 0;
    while i < data.len() {
        let u1: f64 = next().max(1e-12);
        let u2: f64 = next();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f64::consts::PI * u2;
        data[i] += sigma * r * theta.cos();
        if i + 1 < data.len() {
            data[i + 1] += sigma * r * theta.sin();
        }
        i += 2;
    }
}
