//! Behavioral tests for the hash containers and checked 128-bit integers,
//! driven by a deterministic byte-stream random source.

use karst_vm::collections::{HashMap, HashSet};
use karst_vm::fuzzing::RandomStream;
use karst_vm::I128;

fn seed() -> Vec<u8> {
    // A fixed pseudo-random seed; the containers must behave identically on
    // every run.
    let mut bytes = Vec::with_capacity(4096);
    let mut state = 0x2545_f491_4f6c_dd1du64;
    for _ in 0..4096 {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        bytes.push((state >> 32) as u8);
    }
    bytes
}

#[test]
fn map_matches_reference_model() {
    let bytes = seed();
    let mut rng = RandomStream::new(&bytes);
    let mut map: HashMap<u32, u32> = HashMap::new();
    let mut model: std::collections::BTreeMap<u32, u32> = std::collections::BTreeMap::new();

    for step in 0..1000u32 {
        let key = rng.below(200);
        match rng.below(4) {
            0 => {
                let added = map.add(key, step);
                assert_eq!(added, !model.contains_key(&key), "add at step {step}");
                model.entry(key).or_insert(step);
            }
            1 => {
                let previous = map.set(key, step);
                assert_eq!(previous, model.insert(key, step), "set at step {step}");
            }
            2 => {
                assert_eq!(map.remove(&key), model.remove(&key), "remove at step {step}");
            }
            _ => {
                assert_eq!(map.get(&key), model.get(&key), "get at step {step}");
            }
        }
        assert_eq!(map.len(), model.len());
    }

    // Iteration visits each present key exactly once.
    let mut seen: Vec<u32> = map.keys().copied().collect();
    seen.sort_unstable();
    let expected: Vec<u32> = model.keys().copied().collect();
    assert_eq!(seen, expected);
}

#[test]
fn map_get_or_insert_with_constructs_once() {
    let mut map: HashMap<String, Vec<u32>> = HashMap::new();
    map.get_or_insert_with("a".into(), Vec::new).push(1);
    map.get_or_insert_with("a".into(), || panic!("already present"))
        .push(2);
    assert_eq!(map.get("a"), Some(&vec![1, 2]));
}

#[test]
fn map_probe_counts_stay_short() {
    let bytes = seed();
    let mut rng = RandomStream::new(&bytes);
    let mut map: HashMap<u64, u64> = HashMap::new();
    for i in 0..1000u64 {
        map.set(u64::from(rng.u32()) << 16 | i, i);
    }

    // Shed elements until occupancy drops to the steady-state band, then
    // the average probe sequence must be short.
    loop {
        let usage = map.analyze_space_usage();
        assert!(usage.occupancy <= 0.80 + f64::EPSILON);
        if usage.occupancy <= 0.65 {
            assert!(
                usage.mean_probe_count < 2.0,
                "mean probe count {} at occupancy {}",
                usage.mean_probe_count,
                usage.occupancy
            );
            assert!(usage.total_bytes > 0);
            break;
        }
        let key = *map.keys().next().unwrap();
        map.remove(&key);
    }
}

#[test]
fn map_shrinks_after_removals() {
    let mut map: HashMap<u32, u32> = HashMap::new();
    for i in 0..1024 {
        map.set(i, i);
    }
    let grown = map.num_buckets();
    for i in 0..1024 {
        map.remove(&i);
    }
    assert!(map.is_empty());
    assert!(map.num_buckets() < grown);
}

#[test]
fn set_semantics() {
    let bytes = seed();
    let mut rng = RandomStream::new(&bytes);
    let mut set: HashSet<u32> = HashSet::new();
    let mut model = std::collections::BTreeSet::new();

    for _ in 0..1000 {
        let value = rng.below(100);
        if rng.bool() {
            assert_eq!(set.add(value), model.insert(value));
        } else {
            assert_eq!(set.remove(&value), model.remove(&value));
        }
        assert_eq!(set.len(), model.len());
    }
    for value in 0..100 {
        assert_eq!(set.contains(&value), model.contains(&value));
    }

    while let Some(value) = set.pop() {
        assert!(model.remove(&value));
    }
    assert!(model.is_empty());
}

fn random_i128(rng: &mut RandomStream) -> I128 {
    // Keep magnitudes near 2^31 so triple products stay in range; overflow
    // propagation is covered by the unit tests.
    I128::new(i128::from(rng.u32()) - (1 << 31))
}

#[test]
fn i128_algebra() {
    let bytes = seed();
    let mut rng = RandomStream::new(&bytes);
    for _ in 0..200 {
        let a = random_i128(&mut rng);
        let b = random_i128(&mut rng);
        let c = random_i128(&mut rng);

        assert_eq!(a - a, I128::ZERO);
        assert_eq!(a + (-a), I128::ZERO);
        assert_eq!(a + I128::ZERO, a);
        assert_eq!(a + b, b + a);
        assert_eq!((a + b) + c, a + (b + c));
        assert_eq!(a * I128::new(1), a);
        assert_eq!(a * b, b * a);
        assert_eq!((a * b) * c, a * (b * c));
        assert_eq!(a * (b + c), a * b + a * c);
        if b.value() != Some(0) {
            assert_eq!((a * b) / b, a);
            assert_eq!(((a / b) * b) + (a % b), a);
        }
    }
}
