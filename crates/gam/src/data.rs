//! Observation set of the additive model: a response `y`, a linear covariate `A`,
//! a smooth covariate `k` and a site label for each observation.

use crate::errors::{GamError, Result};
use crate::utils::{first_duplicate, into_f64};
use linfa::Float;
use linfa::dataset::DatasetBase;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Data, Ix1, Ix2};
use std::fmt;

/// Partition of the observations by site.
///
/// Site `s` (0-based) owns the observations listed by `members(s)`, in increasing
/// observation order, and observation `i` sits at `position(i)` in its site vector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SiteIndex {
    members: Vec<Vec<usize>>,
    sites: Vec<usize>,
    positions: Vec<usize>,
}

impl SiteIndex {
    /// Build the partition from 0-based site indices, all assumed in `[0, n_sites)`
    pub(crate) fn new(sites: &[usize], n_sites: usize) -> SiteIndex {
        let mut members = vec![vec![]; n_sites];
        let mut positions = Vec::with_capacity(sites.len());
        for (i, &s) in sites.iter().enumerate() {
            positions.push(members[s].len());
            members[s].push(i);
        }
        SiteIndex {
            members,
            sites: sites.to_vec(),
            positions,
        }
    }

    /// Number of sites
    pub fn n_sites(&self) -> usize {
        self.members.len()
    }

    /// Number of observations
    pub fn n_obs(&self) -> usize {
        self.sites.len()
    }

    /// Observation indices of site `s` (0-based)
    pub fn members(&self, s: usize) -> &[usize] {
        &self.members[s]
    }

    /// Number of observations of each site
    pub fn sizes(&self) -> Vec<usize> {
        self.members.iter().map(|m| m.len()).collect()
    }

    /// Site (0-based) of observation `i`
    pub fn site_of(&self, i: usize) -> usize {
        self.sites[i]
    }

    /// Position of observation `i` in the vector of its site
    pub fn position(&self, i: usize) -> usize {
        self.positions[i]
    }

    /// Iterate over the member lists of all sites
    pub fn iter(&self) -> impl Iterator<Item = &[usize]> {
        self.members.iter().map(|m| m.as_slice())
    }

    /// Per observation site effect given the per site latent vectors:
    /// the row-wise sum of the dense `(n_obs, n_sites)` site effect matrix.
    pub fn site_effect<F: Float>(&self, f_site: &[Array1<F>]) -> Array1<F> {
        Array1::from_shape_fn(self.n_obs(), |i| f_site[self.sites[i]][self.positions[i]])
    }

    /// Dense `(n_obs, n_sites)` rendering of the per site latent vectors,
    /// entries outside a site's own observations being zero.
    pub fn to_dense<F: Float>(&self, f_site: &[Array1<F>]) -> Array2<F> {
        let mut dense = Array2::zeros((self.n_obs(), self.n_sites()));
        for (s, members) in self.members.iter().enumerate() {
            for (pos, &i) in members.iter().enumerate() {
                dense[[i, s]] = f_site[s][pos];
            }
        }
        dense
    }

    /// Extract the values of `x` belonging to site `s`
    pub fn select<F: Float>(&self, x: &ArrayBase<impl Data<Elem = F>, Ix1>, s: usize) -> Array1<F> {
        self.members[s].iter().map(|&i| x[i]).collect()
    }
}

/// A validated observation set of the additive GP model.
#[derive(Clone, Debug)]
pub struct GamData<F: Float> {
    y: Array1<F>,
    a: Array1<F>,
    k: Array1<F>,
    site_index: SiteIndex,
}

impl<F: Float> fmt::Display for GamData<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GamData(n_obs={}, n_sites={}, site_sizes={:?})",
            self.n_obs(),
            self.n_sites(),
            self.site_index.sizes()
        )
    }
}

impl<F: Float> GamData<F> {
    /// Validate and build an observation set.
    ///
    /// `site` labels are 1-based and must lie in `[1, n_sites]`. Checks are done in order:
    /// non empty data and at least one site, consistent lengths, finite values,
    /// site label range, every site observed, no duplicated `k` value inside a site.
    pub fn new(
        y: Array1<F>,
        a: Array1<F>,
        k: Array1<F>,
        site: &[i64],
        n_sites: usize,
    ) -> Result<GamData<F>> {
        let n_obs = y.len();
        if n_obs == 0 {
            return Err(GamError::InvalidData(
                "at least one observation is required".to_string(),
            ));
        }
        if n_sites == 0 {
            return Err(GamError::InvalidData(
                "at least one site is required".to_string(),
            ));
        }
        for (name, len) in [("A", a.len()), ("k", k.len()), ("site", site.len())] {
            if len != n_obs {
                return Err(GamError::InvalidData(format!(
                    "{name} has length {len}, expected {n_obs} (length of y)"
                )));
            }
        }
        for (name, values) in [("y", &y), ("A", &a), ("k", &k)] {
            if let Some(i) = values.iter().position(|v| !v.is_finite()) {
                return Err(GamError::InvalidData(format!(
                    "{name}[{i}] is not finite"
                )));
            }
        }

        let mut sites = Vec::with_capacity(n_obs);
        for (index, &label) in site.iter().enumerate() {
            if label < 1 || label > n_sites as i64 {
                return Err(GamError::SiteOutOfRange {
                    index,
                    label,
                    n_sites,
                });
            }
            sites.push((label - 1) as usize);
        }

        if n_sites > n_obs {
            // one of the first n_obs + 1 sites has no observation
            let mut seen = vec![false; n_obs + 1];
            for &s in sites.iter().filter(|&&s| s <= n_obs) {
                seen[s] = true;
            }
            let site = seen.iter().position(|v| !v).unwrap_or(n_obs) + 1;
            return Err(GamError::EmptySite { site });
        }
        let site_index = SiteIndex::new(&sites, n_sites);
        for (s, members) in site_index.iter().enumerate() {
            if members.is_empty() {
                return Err(GamError::EmptySite { site: s + 1 });
            }
            if let Some(v) = first_duplicate(&site_index.select(&k, s)) {
                return Err(GamError::DuplicateCovariate {
                    site: s + 1,
                    value: into_f64(v),
                });
            }
        }

        Ok(GamData {
            y,
            a,
            k,
            site_index,
        })
    }

    /// Build an observation set from a dataset whose records are `(n_obs, 3)` columns
    /// `[A, k, site]` and targets are `y`. Site labels are 1-based integral values.
    pub fn from_dataset(
        dataset: &DatasetBase<
            ArrayBase<impl Data<Elem = F>, Ix2>,
            ArrayBase<impl Data<Elem = F>, Ix1>,
        >,
        n_sites: usize,
    ) -> Result<GamData<F>> {
        let records = dataset.records();
        if records.ncols() != 3 {
            return Err(GamError::InvalidData(format!(
                "expected 3 record columns [A, k, site], got {}",
                records.ncols()
            )));
        }
        let site = site_labels(&records.column(2))?;
        GamData::new(
            dataset.targets().to_owned(),
            records.column(0).to_owned(),
            records.column(1).to_owned(),
            &site,
            n_sites,
        )
    }

    /// Number of observations N
    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    /// Number of sites S
    pub fn n_sites(&self) -> usize {
        self.site_index.n_sites()
    }

    /// Response values
    pub fn y(&self) -> &Array1<F> {
        &self.y
    }

    /// Linear covariate values
    pub fn a(&self) -> &Array1<F> {
        &self.a
    }

    /// Smooth covariate values
    pub fn k(&self) -> &Array1<F> {
        &self.k
    }

    /// Site (0-based) of each observation
    pub fn sites(&self) -> Vec<usize> {
        (0..self.n_obs()).map(|i| self.site_index.site_of(i)).collect()
    }

    /// Observation partition by site
    pub fn site_index(&self) -> &SiteIndex {
        &self.site_index
    }

    /// Smooth covariate values of site `s` (0-based)
    pub fn site_k(&self, s: usize) -> Array1<F> {
        self.site_index.select(&self.k, s)
    }
}

/// Convert float site labels to integers, rejecting non integral values
pub(crate) fn site_labels<F: Float>(column: &ArrayView1<F>) -> Result<Vec<i64>> {
    column
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            if v.fract() != F::zero() {
                return Err(GamError::InvalidData(format!(
                    "site label {} of observation {i} is not an integer",
                    into_f64(v)
                )));
            }
            num_traits::cast::<F, i64>(v).ok_or_else(|| {
                GamError::InvalidData(format!("site label of observation {i} is not representable"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use linfa::Dataset;
    use ndarray::array;

    fn two_sites() -> GamData<f64> {
        GamData::new(
            array![1., 2., 3., 4., 5.],
            array![0., 1., 0., 1., 0.],
            array![0., 1., 0.5, 2., 1.5],
            &[1, 1, 2, 1, 2],
            2,
        )
        .expect("valid data")
    }

    #[test]
    fn test_site_index() {
        let data = two_sites();
        let idx = data.site_index();
        assert_eq!(idx.members(0), &[0, 1, 3]);
        assert_eq!(idx.members(1), &[2, 4]);
        assert_eq!(idx.sizes(), vec![3, 2]);
        assert_eq!(idx.position(3), 2);
        assert_eq!(idx.position(4), 1);
        assert_eq!(data.sites(), vec![0, 0, 1, 0, 1]);
        assert_eq!(data.site_k(1), array![0.5, 1.5]);
    }

    #[test]
    fn test_site_effect_and_dense() {
        let data = two_sites();
        let f_site = vec![array![10., 11., 12.], array![20., 21.]];
        let idx = data.site_index();
        assert_abs_diff_eq!(idx.site_effect(&f_site), array![10., 11., 20., 12., 21.]);
        let dense = idx.to_dense(&f_site);
        assert_eq!(dense.dim(), (5, 2));
        assert_abs_diff_eq!(dense.sum_axis(ndarray::Axis(1)), idx.site_effect(&f_site));
        assert_eq!(dense[[2, 0]], 0.);
    }

    #[test]
    fn test_site_out_of_range() {
        for bad in [0, 3, -1] {
            let err = GamData::new(
                array![1., 2.],
                array![0., 0.],
                array![0., 1.],
                &[1, bad],
                2,
            )
            .unwrap_err();
            assert!(matches!(
                err,
                GamError::SiteOutOfRange {
                    index: 1,
                    n_sites: 2,
                    ..
                }
            ));
            assert!(err.is_validation());
        }
    }

    #[test]
    fn test_invalid_sizes() {
        assert!(matches!(
            GamData::<f64>::new(array![], array![], array![], &[], 1),
            Err(GamError::InvalidData(_))
        ));
        assert!(matches!(
            GamData::new(array![1.], array![0.], array![0.], &[1], 0),
            Err(GamError::InvalidData(_))
        ));
        assert!(matches!(
            GamData::new(array![1., 2.], array![0.], array![0., 1.], &[1, 1], 1),
            Err(GamError::InvalidData(_))
        ));
        assert!(matches!(
            GamData::new(array![1., f64::NAN], array![0., 0.], array![0., 1.], &[1, 1], 1),
            Err(GamError::InvalidData(_))
        ));
    }

    #[test]
    fn test_empty_site() {
        let err = GamData::new(array![1., 2.], array![0., 0.], array![0., 1.], &[1, 1], 2)
            .unwrap_err();
        assert!(matches!(err, GamError::EmptySite { site: 2 }));
    }

    #[test]
    fn test_more_sites_than_observations() {
        let err = GamData::new(array![1.], array![0.], array![0.], &[1], 1 << 40).unwrap_err();
        assert!(matches!(err, GamError::EmptySite { site: 2 }));
        assert!(err.is_validation());

        let err = GamData::new(array![1., 2.], array![0., 0.], array![0., 1.], &[2, 3], 5)
            .unwrap_err();
        assert!(matches!(err, GamError::EmptySite { site: 1 }));
    }

    #[test]
    fn test_duplicate_covariate_in_site() {
        let err = GamData::new(
            array![1., 2., 3.],
            array![0., 0., 0.],
            array![0.5, 1., 0.5],
            &[1, 1, 1],
            1,
        )
        .unwrap_err();
        assert!(matches!(err, GamError::DuplicateCovariate { site: 1, .. }));

        // same k observed at two different sites is fine
        let data = GamData::new(
            array![1., 2.],
            array![0., 0.],
            array![0.5, 0.5],
            &[1, 2],
            2,
        );
        assert!(data.is_ok());
    }

    #[test]
    fn test_from_dataset() {
        let records = array![[0., 0., 1.], [1., 1., 2.], [0., 2., 1.]];
        let targets = array![1., 2., 3.];
        let data = GamData::from_dataset(&Dataset::new(records, targets), 2).expect("valid");
        assert_eq!(data.n_obs(), 3);
        assert_eq!(data.sites(), vec![0, 1, 0]);
        assert_abs_diff_eq!(data.k(), &array![0., 1., 2.]);

        let records = array![[0., 0., 1.5]];
        let err = GamData::from_dataset(&Dataset::new(records, array![1.]), 2).unwrap_err();
        assert!(matches!(err, GamError::InvalidData(_)));
    }
}
