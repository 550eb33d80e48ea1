use anyhow::{Context, Result};

use sn_composite::data::model::{DatasetFile, Spectrum};
use sn_composite::pipeline::{correct, ExtinctionConfig};

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Rest-frame flux: smooth continuum with broad absorption troughs.
fn template(wave: f64, velocity: f64, lines: &[(f64, f64, f64)]) -> f64 {
    // Falls off redward of ~4000 Å like a post-maximum Ia
    let continuum = (wave / 4000.0).powi(-2) * (1.0 - (-(wave / 3200.0).powi(4)).exp());
    let shift = 1.0 - velocity / 299_792.458;
    let depth: f64 = lines
        .iter()
        .map(|&(rest, sigma, strength)| gaussian(wave, rest * shift, sigma, strength))
        .sum();
    continuum * (1.0 - depth.min(0.9))
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn main() -> Result<()> {
    let output_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sample_dataset.json".to_string());
    let mut rng = SimpleRng::new(42);

    // (rest wavelength, width, strength): Ca H&K, Si II 4130, S II, Si II 5972, Si II 6355
    let lines = [
        (3945.0, 60.0, 0.6),
        (4130.0, 30.0, 0.15),
        (5454.0, 35.0, 0.2),
        (5640.0, 35.0, 0.25),
        (5972.0, 40.0, 0.15),
        (6355.0, 70.0, 0.55),
    ];
    let morphologies = ["E", "S0", "Sa", "Sb", "Sc"];
    let mw = ExtinctionConfig::default();

    let mut spectra = Vec::new();
    for sn in 0..8 {
        let name = format!("sn20{:02}{}", sn + 3, (b'a' + sn as u8) as char);
        let redshift = rng.uniform(0.002, 0.04);
        let mw_ebv = rng.uniform(0.0, 0.15);
        let host_ebv = rng.uniform(0.0, 0.3);
        let dm15 = rng.uniform(0.8, 1.8);
        let morph = morphologies[sn % morphologies.len()];

        for epoch in 0..3 {
            let phase = -5.0 + 7.0 * epoch as f64 + rng.uniform(-1.0, 1.0);
            let velocity = 11_000.0 - 150.0 * phase + rng.gauss(0.0, 500.0);
            let start = rng.uniform(3300.0, 3800.0);
            let end = rng.uniform(8500.0, 9800.0);
            let step = 2.5;
            let n = ((end - start) / step) as usize;
            let wave: Vec<f64> = (0..n).map(|i| start + i as f64 * step).collect();

            // Observed frame: redshift, then Galactic reddening
            let rest: Vec<f64> = wave.iter().map(|w| w / (1.0 + redshift)).collect();
            let host = correct(&rest, -host_ebv, &mw)?;
            let galactic = correct(&wave, -mw_ebv, &mw)?;
            let snr = rng.uniform(15.0, 60.0);

            let mut flux = Vec::with_capacity(n);
            let mut sigma = Vec::with_capacity(n);
            for i in 0..n {
                let clean = template(rest[i], velocity, &lines) * host[i] * galactic[i];
                let noise = clean.abs() / snr;
                flux.push(clean + rng.gauss(0.0, noise));
                sigma.push(noise);
            }

            let spectrum = Spectrum::from_errors(wave, flux, sigma)?
                .with_metadata("name", name.as_str())
                .with_metadata("redshift", redshift)
                .with_metadata("mw_ebv", mw_ebv)
                .with_metadata("host_ebv", host_ebv)
                .with_metadata("phase", phase)
                .with_metadata("dm15", dm15)
                .with_metadata("velocity", velocity)
                .with_metadata("morph", morph);
            spectra.push(spectrum);
        }
    }

    let count = spectra.len();
    let file = std::fs::File::create(&output_path)
        .with_context(|| format!("creating {output_path}"))?;
    serde_json::to_writer(std::io::BufWriter::new(file), &DatasetFile { spectra })
        .with_context(|| format!("writing {output_path}"))?;

    println!("Wrote {count} spectra of 8 supernovae to {output_path}");
    Ok(())
}
