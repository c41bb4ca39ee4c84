//! The operator library: choice points a generator body can contain.
//!
//! Each operator is defined twice: by its full candidate list, in a
//! deterministic order (used by the search strategies), and by a direct
//! random sampler that never materializes the candidates (used by the
//! randomized strategy). Candidate lists are capped at [`MAX_CANDIDATES`].

use std::collections::BTreeSet;

use atlas_core::Value;
use rand::seq::{index, SliceRandom};
use rand::Rng;

use crate::error::{AtlasError, AtlasResult};
use crate::namespace::CallArgs;

/// Largest candidate list an operator call may enumerate.
pub const MAX_CANDIDATES: usize = 1 << 20;

/// A built-in choice-point operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `Select(domain)`: one element of the domain.
    Select,
    /// `Subset(domain, lengths=?, include_empty=false)`: order-preserving combinations.
    Subset,
    /// `OrderedSubset(domain, lengths=?, include_empty=false)`: permutations.
    OrderedSubset,
    /// `Product(domains)`: one element from each domain.
    Product,
    /// `Sequence(domain, max_len=? | lengths=?)`: sequences with repetition.
    Sequence,
}

impl Operator {
    pub const ALL: [Operator; 5] = [
        Operator::Select,
        Operator::Subset,
        Operator::OrderedSubset,
        Operator::Product,
        Operator::Sequence,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Operator::Select => "Select",
            Operator::Subset => "Subset",
            Operator::OrderedSubset => "OrderedSubset",
            Operator::Product => "Product",
            Operator::Sequence => "Sequence",
        }
    }

    fn allowed_kwargs(self) -> &'static [&'static str] {
        match self {
            Operator::Select => &["domain", "context"],
            Operator::Subset | Operator::OrderedSubset => {
                &["domain", "lengths", "include_empty", "context"]
            }
            Operator::Product => &["domains", "context"],
            Operator::Sequence => &["domain", "max_len", "lengths", "context"],
        }
    }

    fn check_call(self, call: &CallArgs) -> AtlasResult<()> {
        if call.args.len() > 1 {
            return Err(AtlasError::invalid_arguments(
                self.name(),
                format!("expected one positional argument, got {}", call.args.len()),
            ));
        }
        let allowed = self.allowed_kwargs();
        if let Some(unknown) = call.kwargs.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(AtlasError::invalid_arguments(
                self.name(),
                format!("unexpected keyword argument `{}`", unknown),
            ));
        }
        Ok(())
    }

    fn domain(self, call: &CallArgs) -> AtlasResult<Vec<Value>> {
        let key = if self == Operator::Product { "domains" } else { "domain" };
        let value = call
            .get(0, key)
            .ok_or_else(|| AtlasError::invalid_arguments(self.name(), format!("missing `{}`", key)))?;
        value.elements().ok_or_else(|| {
            AtlasError::invalid_arguments(
                self.name(),
                format!("`{}` must be a list or str, got {}", key, value.type_name()),
            )
        })
    }

    /// Allowed result lengths for the sized operators, ascending.
    fn lengths(self, call: &CallArgs, domain_len: usize) -> AtlasResult<Vec<usize>> {
        let mut lengths = BTreeSet::new();
        match call.kwarg("lengths") {
            Some(Value::Int(n)) => {
                lengths.insert(self.length(*n)?);
            }
            Some(Value::List(items)) => {
                for item in items {
                    let n = item.as_int().ok_or_else(|| {
                        AtlasError::invalid_arguments(self.name(), "`lengths` must contain ints")
                    })?;
                    lengths.insert(self.length(n)?);
                }
            }
            Some(other) => {
                return Err(AtlasError::invalid_arguments(
                    self.name(),
                    format!("`lengths` must be an int or list, got {}", other.type_name()),
                ))
            }
            None if self == Operator::Sequence => {
                let max_len = call.kwarg("max_len").ok_or_else(|| {
                    AtlasError::invalid_arguments(self.name(), "requires `max_len` or `lengths`")
                })?;
                let max_len = max_len.as_int().ok_or_else(|| {
                    AtlasError::invalid_arguments(self.name(), "`max_len` must be an int")
                })?;
                lengths.extend(1..=self.length(max_len)?);
            }
            None => lengths.extend(1..=domain_len),
        }
        if call.kwarg("include_empty").is_some_and(Value::is_truthy) {
            lengths.insert(0);
        }
        if self != Operator::Sequence {
            lengths.retain(|&n| n <= domain_len);
        }
        Ok(lengths.into_iter().collect())
    }

    fn length(self, n: i64) -> AtlasResult<usize> {
        usize::try_from(n).map_err(|_| {
            AtlasError::invalid_arguments(self.name(), format!("negative length {}", n))
        })
    }

    fn product_domains(self, call: &CallArgs) -> AtlasResult<Vec<Vec<Value>>> {
        self.domain(call)?
            .iter()
            .map(|d| {
                d.elements().ok_or_else(|| {
                    AtlasError::invalid_arguments(
                        self.name(),
                        format!("each domain must be a list or str, got {}", d.type_name()),
                    )
                })
            })
            .collect()
    }

    /// Number of candidates [`Operator::candidates`] would produce, or `None`
    /// if it does not fit in a `u128`.
    pub fn candidate_count(self, call: &CallArgs) -> AtlasResult<Option<u128>> {
        self.check_call(call)?;
        let count = match self {
            Operator::Select => Some(self.domain(call)?.len() as u128),
            Operator::Subset | Operator::OrderedSubset | Operator::Sequence => {
                let n = self.domain(call)?.len() as u128;
                self.lengths(call, n as usize)?
                    .into_iter()
                    .try_fold(0u128, |total, k| {
                        let k = k as u128;
                        let per_length = match self {
                            Operator::Subset => binomial(n, k),
                            Operator::OrderedSubset => {
                                (0..k).try_fold(1u128, |acc, i| acc.checked_mul(n - i))
                            }
                            _ => u32::try_from(k).ok().and_then(|k| n.checked_pow(k)),
                        }?;
                        total.checked_add(per_length)
                    })
            }
            Operator::Product => self
                .product_domains(call)?
                .iter()
                .try_fold(1u128, |acc, d| acc.checked_mul(d.len() as u128)),
        };
        Ok(count)
    }

    /// Every value the operator can return, in enumeration order.
    ///
    /// Fails when there are more than [`MAX_CANDIDATES`]; sampling has no
    /// such limit.
    pub fn candidates(self, call: &CallArgs) -> AtlasResult<Vec<Value>> {
        match self.candidate_count(call)? {
            Some(count) if count <= MAX_CANDIDATES as u128 => {}
            count => {
                return Err(AtlasError::invalid_arguments(
                    self.name(),
                    format!(
                        "{} candidates exceed the enumeration limit of {}",
                        count.map_or_else(|| "too many".to_string(), |c| c.to_string()),
                        MAX_CANDIDATES
                    ),
                ))
            }
        }
        match self {
            Operator::Select => self.domain(call),
            Operator::Subset => {
                let domain = self.domain(call)?;
                let mut out = Vec::new();
                for k in self.lengths(call, domain.len())? {
                    combinations(&domain, k, &mut out);
                }
                Ok(out)
            }
            Operator::OrderedSubset => {
                let domain = self.domain(call)?;
                let mut out = Vec::new();
                for k in self.lengths(call, domain.len())? {
                    permutations(&domain, k, &mut out);
                }
                Ok(out)
            }
            Operator::Product => {
                let domains = self.product_domains(call)?;
                let mut out = Vec::new();
                cartesian(&domains, &mut Vec::new(), &mut out);
                Ok(out)
            }
            Operator::Sequence => {
                let domain = self.domain(call)?;
                let mut out = Vec::new();
                for k in self.lengths(call, domain.len())? {
                    let domains = vec![domain.clone(); k];
                    cartesian(&domains, &mut Vec::new(), &mut out);
                }
                Ok(out)
            }
        }
    }

    /// Draw one candidate uniformly per length class without enumerating.
    /// `None` when the operator has no candidates.
    pub fn sample<R: Rng>(self, call: &CallArgs, rng: &mut R) -> AtlasResult<Option<Value>> {
        self.check_call(call)?;
        match self {
            Operator::Select => Ok(self.domain(call)?.choose(rng).cloned()),
            Operator::Subset | Operator::OrderedSubset => {
                let domain = self.domain(call)?;
                let Some(&k) = self.lengths(call, domain.len())?.choose(rng) else {
                    return Ok(None);
                };
                let mut picked = index::sample(rng, domain.len(), k).into_vec();
                if self == Operator::Subset {
                    picked.sort_unstable();
                } else {
                    picked.shuffle(rng);
                }
                Ok(Some(Value::List(
                    picked.into_iter().map(|i| domain[i].clone()).collect(),
                )))
            }
            Operator::Product => {
                let domains = self.product_domains(call)?;
                let picked: Option<Vec<Value>> = domains.iter().map(|d| d.choose(rng).cloned()).collect();
                Ok(picked.map(Value::List))
            }
            Operator::Sequence => {
                let domain = self.domain(call)?;
                let Some(&k) = self.lengths(call, domain.len())?.choose(rng) else {
                    return Ok(None);
                };
                let picked: Option<Vec<Value>> = (0..k).map(|_| domain.choose(rng).cloned()).collect();
                Ok(picked.map(Value::List))
            }
        }
    }
}

fn binomial(n: u128, k: u128) -> Option<u128> {
    if k > n {
        return Some(0);
    }
    let k = k.min(n - k);
    (0..k).try_fold(1u128, |acc, i| Some(acc.checked_mul(n - i)? / (i + 1)))
}

fn combinations(domain: &[Value], k: usize, out: &mut Vec<Value>) {
    fn go(domain: &[Value], k: usize, start: usize, acc: &mut Vec<Value>, out: &mut Vec<Value>) {
        if acc.len() == k {
            out.push(Value::List(acc.clone()));
            return;
        }
        for i in start..domain.len() {
            acc.push(domain[i].clone());
            go(domain, k, i + 1, acc, out);
            acc.pop();
        }
    }
    go(domain, k, 0, &mut Vec::new(), out);
}

fn permutations(domain: &[Value], k: usize, out: &mut Vec<Value>) {
    fn go(domain: &[Value], k: usize, used: &mut [bool], acc: &mut Vec<Value>, out: &mut Vec<Value>) {
        if acc.len() == k {
            out.push(Value::List(acc.clone()));
            return;
        }
        for i in 0..domain.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            acc.push(domain[i].clone());
            go(domain, k, used, acc, out);
            acc.pop();
            used[i] = false;
        }
    }
    go(domain, k, &mut vec![false; domain.len()], &mut Vec::new(), out);
}

fn cartesian(domains: &[Vec<Value>], acc: &mut Vec<Value>, out: &mut Vec<Value>) {
    let Some((first, rest)) = domains.split_first() else {
        out.push(Value::List(acc.clone()));
        return;
    };
    for item in first {
        acc.push(item.clone());
        cartesian(rest, acc, out);
        acc.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn list(items: &[&str]) -> Value {
        Value::from(items.to_vec())
    }

    #[test]
    fn test_enumeration_limit() {
        let domain: Vec<i64> = (0..25).collect();
        let call = CallArgs::new(vec![Value::from(domain)]);
        assert_eq!(Operator::Subset.candidate_count(&call).unwrap(), Some((1 << 25) - 1));
        assert!(matches!(
            Operator::Subset.candidates(&call),
            Err(AtlasError::InvalidArguments { .. })
        ));
        let mut rng = StdRng::seed_from_u64(1);
        assert!(Operator::Subset.sample(&call, &mut rng).unwrap().is_some());

        let small = CallArgs::new(vec![list(&["a", "b", "c", "d"])]).with_kwarg("lengths", 2);
        assert_eq!(Operator::Subset.candidate_count(&small).unwrap(), Some(6));
        assert_eq!(Operator::OrderedSubset.candidate_count(&small).unwrap(), Some(12));
        let seq = CallArgs::new(vec![list(&["0", "1"])]).with_kwarg("max_len", 3);
        assert_eq!(Operator::Sequence.candidate_count(&seq).unwrap(), Some(14));
    }

    #[test]
    fn test_names_round_trip() {
        for op in Operator::ALL {
            assert_eq!(Operator::from_name(op.name()), Some(op));
        }
        assert_eq!(Operator::from_name("select"), None);
    }

    #[test]
    fn test_subset_candidates_by_length() {
        let call = CallArgs::new(vec![list(&["a", "b", "c"])]);
        let out = Operator::Subset.candidates(&call).unwrap();
        assert_eq!(out.len(), 7);
        assert_eq!(out[0], list(&["a"]));
        assert_eq!(out[3], list(&["a", "b"]));
        assert_eq!(out[6], list(&["a", "b", "c"]));

        let call = call.with_kwarg("lengths", 2).with_kwarg("include_empty", true);
        let out = Operator::Subset.candidates(&call).unwrap();
        assert_eq!(out[0], Value::List(vec![]));
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_ordered_subset_and_product() {
        let call = CallArgs::new(vec![list(&["a", "b", "c"])]).with_kwarg("lengths", 2);
        assert_eq!(Operator::OrderedSubset.candidates(&call).unwrap().len(), 6);

        let domains = Value::List(vec![list(&["x", "y"]), Value::from(vec![1, 2, 3])]);
        let out = Operator::Product.candidates(&CallArgs::new(vec![domains])).unwrap();
        assert_eq!(out.len(), 6);
        assert_eq!(out[1], Value::List(vec!["x".into(), 2.into()]));
    }

    #[test]
    fn test_sequence_requires_length() {
        let call = CallArgs::new(vec![list(&["0", "1"])]);
        assert!(Operator::Sequence.candidates(&call).is_err());
        let out = Operator::Sequence
            .candidates(&call.with_kwarg("max_len", 2))
            .unwrap();
        assert_eq!(out.len(), 2 + 4);
    }

    #[test]
    fn test_context_is_accepted_and_unknown_rejected() {
        let call = CallArgs::new(vec![list(&["a"])]).with_kwarg("context", 1);
        assert!(Operator::Select.candidates(&call).is_ok());
        let call = CallArgs::new(vec![list(&["a"])]).with_kwarg("bogus", 1);
        assert!(Operator::Select.candidates(&call).is_err());
    }

    #[test]
    fn test_samples_are_candidates() {
        let mut rng = StdRng::seed_from_u64(7);
        let call = CallArgs::new(vec![list(&["a", "b", "c", "d"])]).with_kwarg("lengths", vec![1, 3]);
        for op in [Operator::Select, Operator::Subset, Operator::OrderedSubset] {
            let call = if op == Operator::Select {
                CallArgs::new(call.args.clone())
            } else {
                call.clone()
            };
            let candidates = op.candidates(&call).unwrap();
            for _ in 0..20 {
                let v = op.sample(&call, &mut rng).unwrap().unwrap();
                assert!(candidates.contains(&v), "{:?} sampled {}", op, v);
            }
        }
        let empty = CallArgs::new(vec![Value::List(vec![])]);
        assert_eq!(Operator::Select.sample(&empty, &mut rng).unwrap(), None);
    }
}
