use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::config::VariantPreset;
use crate::core::instance::{ConstraintFlags, ProblemInstance, ProblemInstanceBatch};

const PROB_TIME_WINDOW: f64 = 0.6;
const PROB_OPEN: f64 = 0.3;
const PROB_BACKHAUL: f64 = 0.4;
const PROB_LIMIT: f64 = 0.5;

/// Samples instances with customers uniform in the unit square.
pub struct UniformGenerator {
    num_locations: usize,
    variant_preset: VariantPreset,
    rng: StdRng,
}

impl UniformGenerator {
    pub fn new(num_locations: usize, variant_preset: VariantPreset, seed: u64) -> Self {
        info!(
            "Creating instance generator: {} locations, variant preset {}",
            num_locations, variant_preset
        );
        Self { num_locations, variant_preset, rng: StdRng::seed_from_u64(seed) }
    }

    fn capacity_for(num_locations: usize) -> u32 {
        match num_locations {
            0..=10 => 20,
            11..=20 => 30,
            21..=50 => 40,
            _ => 50,
        }
    }

    fn draw_flags(&mut self) -> ConstraintFlags {
        match self.variant_preset {
            VariantPreset::Cvrp => ConstraintFlags::default(),
            VariantPreset::SingleFeat => {
                let mut flags = ConstraintFlags::default();
                match self.rng.gen_range(0..5) {
                    0 => flags.open_route = true,
                    1 => flags.backhaul = true,
                    2 => flags.duration_limit = true,
                    3 => flags.time_windows = true,
                    _ => {}
                }
                flags
            }
            VariantPreset::All => ConstraintFlags {
                open_route: self.rng.gen_bool(PROB_OPEN),
                backhaul: self.rng.gen_bool(PROB_BACKHAUL),
                duration_limit: self.rng.gen_bool(PROB_LIMIT),
                time_windows: self.rng.gen_bool(PROB_TIME_WINDOW),
            },
        }
    }

    pub fn generate(&mut self, num_samples: usize) -> ProblemInstanceBatch {
        let capacity = Self::capacity_for(self.num_locations);
        let instances = (0..num_samples)
            .map(|_| {
                let locations = (0..=self.num_locations)
                    .map(|_| (self.rng.gen::<f64>(), self.rng.gen::<f64>()))
                    .collect();
                let demands = std::iter::once(0)
                    .chain((0..self.num_locations).map(|_| self.rng.gen_range(1..=9)))
                    .collect();
                ProblemInstance { locations, demands, capacity, flags: self.draw_flags() }
            })
            .collect();

        let batch = ProblemInstanceBatch::new(instances);
        for (variant, count) in &batch.variant_counts().0 {
            debug!(
                "   - {}: {}/{} ({:.1}%)",
                variant,
                count,
                num_samples,
                *count as f64 / num_samples.max(1) as f64 * 100.0
            );
        }
        info!("Generated {} instances", num_samples);
        batch
    }
}

/// Reads pre-generated batches (`*.json`) from a folder, in file-name order.
pub struct FileInputAdapter {
    input_folder: PathBuf,
}

impl FileInputAdapter {
    pub fn new(input_folder: PathBuf) -> Self {
        info!("Creating new FileInputAdapter with input folder: {:?}", input_folder);
        Self { input_folder }
    }

    pub fn fetch_batch(&self) -> Result<ProblemInstanceBatch> {
        info!("Reading instance files from folder: {:?}", self.input_folder);
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.input_folder)
            .with_context(|| format!("Failed to read directory: {:?}", self.input_folder))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut instances = Vec::new();
        for path in paths {
            debug!("Reading file: {:?}", path);
            let content = fs::read_to_string(&path).with_context(|| format!("Failed to read file: {:?}", path))?;
            let batch: ProblemInstanceBatch =
                serde_json::from_str(&content).with_context(|| format!("Failed to parse instance batch: {:?}", path))?;
            batch
                .validate()
                .map_err(|(index, e)| anyhow::Error::new(e).context(format!("Invalid instance {} in {:?}", index, path)))?;
            instances.extend(batch.instances().iter().cloned());
        }
        info!("Read {} instances from folder", instances.len());
        Ok(ProblemInstanceBatch::new(instances))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn generated_instances_are_well_formed() {
        let mut generator = UniformGenerator::new(10, VariantPreset::SingleFeat, 42);
        let batch = generator.generate(8);
        assert_eq!(batch.len(), 8);
        for instance in batch.iter() {
            assert_eq!(instance.locations.len(), 11);
            assert_eq!(instance.demands[0], 0);
            assert!(instance.demands[1..].iter().all(|d| (1..=9).contains(d)));
            let flags = instance.flags;
            let set = [flags.open_route, flags.backhaul, flags.duration_limit, flags.time_windows]
                .iter()
                .filter(|f| **f)
                .count();
            assert!(set <= 1);
        }
    }

    #[test]
    fn same_seed_same_batch() {
        let a = UniformGenerator::new(5, VariantPreset::All, 7).generate(3);
        let b = UniformGenerator::new(5, VariantPreset::All, 7).generate(3);
        assert_eq!(a, b);
    }

    #[test]
    fn cvrp_preset_sets_no_flags() {
        let batch = UniformGenerator::new(5, VariantPreset::Cvrp, 1).generate(4);
        assert_eq!(batch.variant_counts().get("has_time_windows"), Some(0));
        assert_eq!(batch.variant_counts().get("has_open"), Some(0));
    }

    #[test]
    fn malformed_instance_file_is_rejected() {
        let dir = std::env::temp_dir().join(format!("routeforge-input-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let malformed = r#"{"instances": [{
            "locations": [[0.5, 0.5], [0.1, 0.2], [0.9, 0.4]],
            "demands": [0, 3],
            "capacity": 10,
            "flags": {"open_route": false, "backhaul": false, "duration_limit": false, "time_windows": false}
        }]}"#;
        fs::write(dir.join("broken.json"), malformed).unwrap();

        let err = FileInputAdapter::new(dir.clone()).fetch_batch().unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("broken.json"), "{}", message);
        assert!(message.contains("3 locations but 2 demands"), "{}", message);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn reads_batches_from_folder() {
        let dir = std::env::temp_dir().join(format!("routeforge-input-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let batch = UniformGenerator::new(4, VariantPreset::Cvrp, 3).generate(2);
        fs::write(dir.join("a.json"), serde_json::to_string(&batch).unwrap()).unwrap();
        fs::write(dir.join("b.json"), serde_json::to_string(&batch).unwrap()).unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let loaded = FileInputAdapter::new(dir.clone()).fetch_batch().unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.instances()[0].demands, batch.instances()[0].demands);
        assert_eq!(loaded.instances()[3].capacity, batch.instances()[1].capacity);
        fs::remove_dir_all(dir).unwrap();
    }
}
