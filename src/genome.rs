use crate::error::{ConfigError, check_rate};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

pub const GENE_LIMIT: f32 = 1.0;

/// Flat weight vector of one individual.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    genes: Vec<f32>,
}

impl Genome {
    pub fn random<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Self {
        let genes = (0..len)
            .map(|_| rng.gen_range(-GENE_LIMIT..=GENE_LIMIT))
            .collect();
        Self { genes }
    }

    pub fn from_vec(genes: Vec<f32>) -> Self {
        Self { genes }
    }

    pub fn zeros(len: usize) -> Self {
        Self {
            genes: vec![0.0; len],
        }
    }

    pub fn genes(&self) -> &[f32] {
        &self.genes
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Gaussian point mutation: each gene mutates with probability `rate`,
    /// then is clamped back into `[-1, 1]`.
    pub fn mutate<R: Rng + ?Sized>(
        &mut self,
        rate: f64,
        strength: f32,
        rng: &mut R,
    ) -> Result<(), ConfigError> {
        check_rate("mutation_rate", rate)?;
        // Normal::new accepts a negative std-dev, so reject it here
        if !strength.is_finite() || strength < 0.0 {
            return Err(ConfigError::MutationStrength(strength));
        }
        let noise =
            Normal::new(0.0f32, strength).map_err(|_| ConfigError::MutationStrength(strength))?;
        for g in &mut self.genes {
            if rng.gen_bool(rate) {
                *g = (*g + noise.sample(rng)).clamp(-GENE_LIMIT, GENE_LIMIT);
            }
        }
        Ok(())
    }

    /// Single-point crossover: `self[..p] ++ other[p..]` with `p` uniform in `[0, len)`.
    pub fn crossover<R: Rng + ?Sized>(
        &self,
        other: &Genome,
        rng: &mut R,
    ) -> Result<Genome, ConfigError> {
        if self.len() != other.len() {
            return Err(ConfigError::GenomeLengthMismatch {
                left: self.len(),
                right: other.len(),
            });
        }
        if self.is_empty() {
            return Err(ConfigError::Zero {
                name: "genome length",
            });
        }
        let point = rng.gen_range(0..self.len());
        let mut genes = Vec::with_capacity(self.len());
        genes.extend_from_slice(&self.genes[..point]);
        genes.extend_from_slice(&other.genes[point..]);
        Ok(Genome { genes })
    }

    pub fn distance(&self, other: &Genome) -> f32 {
        self.genes
            .iter()
            .zip(&other.genes)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn random_genes_stay_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let g = Genome::random(468, &mut rng);
        assert_eq!(g.len(), 468);
        assert!(g.genes().iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn mutation_is_deterministic_for_fixed_seed() {
        let mut a = Genome::zeros(64);
        let mut b = Genome::zeros(64);
        a.mutate(0.5, 0.2, &mut ChaCha8Rng::seed_from_u64(7)).unwrap();
        b.mutate(0.5, 0.2, &mut ChaCha8Rng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Genome::zeros(64));
    }

    #[test]
    fn zero_rate_leaves_genome_untouched() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let original = Genome::random(32, &mut rng);
        let mut g = original.clone();
        g.mutate(0.0, 0.2, &mut rng).unwrap();
        assert_eq!(g, original);
    }

    #[test]
    fn invalid_mutation_parameters_are_config_errors() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut g = Genome::zeros(4);
        assert!(matches!(
            g.mutate(1.2, 0.2, &mut rng),
            Err(ConfigError::RateOutOfRange { .. })
        ));
        assert_eq!(
            g.mutate(0.1, -1.0, &mut rng),
            Err(ConfigError::MutationStrength(-1.0))
        );
    }

    #[test]
    fn negative_or_non_finite_strength_leaves_genes_untouched() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let original = Genome::random(16, &mut rng);
        for strength in [-0.01, -1.0, f32::NAN, f32::INFINITY] {
            let mut g = original.clone();
            assert!(matches!(
                g.mutate(1.0, strength, &mut rng),
                Err(ConfigError::MutationStrength(_))
            ));
            assert_eq!(g, original);
        }
        let mut g = original.clone();
        g.mutate(1.0, 0.0, &mut rng).unwrap();
        assert_eq!(g, original);
    }

    #[test]
    fn crossover_rejects_mismatched_lengths() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let a = Genome::zeros(10);
        let b = Genome::zeros(11);
        assert_eq!(
            a.crossover(&b, &mut rng),
            Err(ConfigError::GenomeLengthMismatch { left: 10, right: 11 })
        );
    }

    #[test]
    fn crossover_child_is_independent_of_parents() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let a = Genome::from_vec(vec![0.5; 8]);
        let b = Genome::from_vec(vec![-0.5; 8]);
        let mut child = a.crossover(&b, &mut rng).unwrap();
        child.mutate(1.0, 0.5, &mut rng).unwrap();
        assert_eq!(a.genes(), &[0.5; 8]);
        assert_eq!(b.genes(), &[-0.5; 8]);
    }

    #[test]
    fn distance_is_euclidean() {
        let a = Genome::from_vec(vec![0.0, 0.0]);
        let b = Genome::from_vec(vec![0.3, 0.4]);
        assert!((a.distance(&b) - 0.5).abs() < 1e-6);
        assert_eq!(a.distance(&a), 0.0);
    }

    proptest! {
        #[test]
        fn mutation_preserves_length_and_bounds(
            genes in proptest::collection::vec(-1.0f32..=1.0, 1..500),
            rate in 0.0f64..=1.0,
            strength in 0.0f32..3.0,
            seed in any::<u64>(),
        ) {
            let mut g = Genome::from_vec(genes.clone());
            g.mutate(rate, strength, &mut ChaCha8Rng::seed_from_u64(seed)).unwrap();
            prop_assert_eq!(g.len(), genes.len());
            prop_assert!(g.genes().iter().all(|v| (-1.0..=1.0).contains(v)));
        }

        #[test]
        fn crossover_splits_at_exactly_one_point(len in 1usize..300, seed in any::<u64>()) {
            let a = Genome::from_vec(vec![0.5; len]);
            let b = Genome::from_vec(vec![-0.5; len]);
            let child = a.crossover(&b, &mut ChaCha8Rng::seed_from_u64(seed)).unwrap();
            prop_assert_eq!(child.len(), len);
            let point = child.genes().iter().take_while(|&&v| v == 0.5).count();
            prop_assert!(point < len);
            prop_assert!(child.genes()[point..].iter().all(|&v| v == -0.5));
        }
    }
}
