//!
//! Demonstration driver: build a receiver picket around a known transmitter,
//! perturb the true bearings with Gaussian noise and run every estimator.
//!
//! Receivers are read from stdin, one `lon lat sigma_deg` triple per line
//! (decimal degrees). Example:
//!
//! ```text
//! echo "-105.1 35.0 2.0
//! -105.0 34.9 2.0
//! -104.9 35.05 2.0" | cargo run --example lsfix -- --lon -105.0 --lat 35.0
//! ```
//!
use clap::{ArgAction, Parser};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use dflocate::{ProjectedPoint, Report, ReportCollection};

use std::error::Error;
use std::io::{self, BufRead};

#[derive(Parser)]
#[command(version = "0.1", about = "Bearings-only localization demo", long_about = None)]
struct Cli {
    /// Transmitter longitude, decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,
    /// Transmitter latitude, decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,
    /// RNG seed for the bearing noise
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Increase verbosity
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    init_logger(args.verbose);

    let transmitter = ProjectedPoint::latlon([args.lon, args.lat])?;
    let truth = transmitter.xy()?;
    println!(
        "transmitter at lon {} lat {} -> X={:.1} Y={:.1}",
        args.lon, args.lat, truth[0], truth[1]
    );

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut coll = ReportCollection::new();

    let stdin = io::stdin().lock();
    for line in stdin.lines() {
        let line = line?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() != 3 {
            return Err(format!("expecting '<lon> <lat> <sigma>', found: {line}").into());
        }
        let lon: f64 = fields[0].parse()?;
        let lat: f64 = fields[1].parse()?;
        let sigma: f64 = fields[2].parse()?;

        let name = format!("station{}", coll.len());
        let mut report = Report::latlon([lon, lat], 0.0, sigma, name.clone())?;
        let true_bearing = report.bearing_to(truth);
        let noise = Normal::new(0.0, sigma.to_radians())?;
        report.set_bearing(true_bearing + noise.sample(&mut rng));
        println!(
            "{name}: lon {lon} lat {lat}, true bearing {:.2} deg, reported {:.2} deg",
            true_bearing.to_degrees(),
            report.bearing().to_degrees()
        );
        coll.add_report(report);
    }

    let mut fix = ProjectedPoint::latlon([0.0, 0.0])?;

    coll.ls_fix(&mut fix)?;
    print_fix("least squares", &fix, truth)?;

    for min_angle in [0.0, 15.0, 30.0] {
        match coll.fix_cut_average(&mut fix, min_angle)? {
            Some(stddev) => {
                print_fix(&format!("fix cut average (>= {min_angle} deg)"), &fix, truth)?;
                println!("    spread: ({:.1}, {:.1}) m", stddev[0], stddev[1]);
            }
            None => println!("fix cut average (>= {min_angle} deg): no qualifying pairs"),
        }
    }

    let ellipse = coll.stansfield_fix(&mut fix)?;
    print_fix("stansfield", &fix, truth)?;
    print_ellipse(&ellipse);

    coll.ml_fix(&mut fix)?;
    print_fix("maximum likelihood", &fix, truth)?;
    let ellipse = coll.cramer_rao_bounds(&fix)?;
    print_ellipse(&ellipse);

    coll.aggressive_ml_fix(&mut fix)?;
    print_fix("aggressive maximum likelihood", &fix, truth)?;

    Ok(())
}

fn print_fix(label: &str, fix: &ProjectedPoint, truth: [f64; 2]) -> Result<(), Box<dyn Error>> {
    let xy = fix.xy()?;
    let ll = fix.user_coords()?;
    let miss = ((xy[0] - truth[0]).powi(2) + (xy[1] - truth[1]).powi(2)).sqrt();
    println!(
        "{label}: lon {:.6} lat {:.6} (X={:.1} Y={:.1}), {miss:.1} m from truth",
        ll[0], ll[1], xy[0], xy[1]
    );
    Ok(())
}

fn print_ellipse(ellipse: &dflocate::ErrorEllipse) {
    println!(
        "    1-sigma ellipse: a={:.1} m b={:.1} m rotation {:.1} deg",
        ellipse.semi_axis_a(),
        ellipse.semi_axis_b(),
        ellipse.rotation.to_degrees()
    );
}

//
// Logger
//
fn init_logger(verbose: u8) {
    use env_logger::Env;
    use log::LevelFilter;

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));

    match verbose {
        1 => builder.filter_level(LevelFilter::Debug),
        _ if verbose > 1 => builder.filter_level(LevelFilter::Trace),
        _ => &mut builder,
    }
    .init();
}
