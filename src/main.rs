use anyhow::Result;
use clap::Parser;
use halosim::io::dump;
use halosim::{ProjectContext, Simulator};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;

/// Monte-Carlo simulation of atmospheric ice-crystal halos.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the JSON configuration file
    config: PathBuf,
    /// Directory where the direction dumps are written
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let start = Instant::now();
    let context = ProjectContext::from_file(&cli.config)?;
    std::fs::create_dir_all(&cli.output)?;

    let wavelengths = context.wavelengths.clone();
    let max_recursion = context.max_recursion;
    let mut simulator = Simulator::new(context);
    println!("Initialization: {:.2?}", start.elapsed());

    for (i, info) in wavelengths.iter().enumerate() {
        println!("starting at wavelength: {:.1}", info.wavelength);
        simulator.set_wavelength_index(i);

        let bar = ProgressBar::new(max_recursion as u64);
        bar.set_style(
            ProgressStyle::with_template("  [{bar:30}] step {pos}/{len} {msg}")?
                .progress_chars("=> "),
        );

        let t0 = Instant::now();
        simulator.start_with_progress(|p| {
            bar.set_position(p.step as u64 + 1);
            bar.set_message(format!(
                "pass {}/{}, {} alive",
                p.pass + 1,
                p.total_passes,
                p.alive_rays
            ));
        });
        bar.finish_and_clear();
        println!("Ray tracing: {:.2?}", t0.elapsed());

        let t0 = Instant::now();
        let directions = simulator.final_directions();
        let filename = format!("directions_{:.1}_{}.bin", info.wavelength, i);
        dump::write_final_directions(
            &cli.output.join(filename),
            info.wavelength,
            info.weight,
            &directions,
        )?;
        println!("Writing {} rays: {:.2?}", directions.len(), t0.elapsed());
    }

    println!("Total: {:.3?}", start.elapsed());
    Ok(())
}
