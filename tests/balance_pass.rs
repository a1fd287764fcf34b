//! Multi-rank balancing passes over the in-process communicator.

use mesh_forge::balance::{
    balance, BalanceConfig, BalanceError, BalancerContext, PartitionStrategy,
};
use mesh_forge::comm::{LocalComm, LocalUniverse, NoComm};
use mesh_forge::prelude::*;
use mesh_forge::topology::element::ElementTag;
use serial_test::serial;
use std::collections::HashMap;

/// `n` disconnected unit triangles owned by `rank`, offset so centroids
/// differ per rank.
fn strip_forest(rank: usize, n: usize) -> ElementForest {
    let mut coords = Vec::with_capacity(3 * n);
    let mut cells = Vec::with_capacity(n);
    for i in 0..n {
        let x = i as f64;
        let y = rank as f64 * 10.0;
        coords.push([x, y, 0.0]);
        coords.push([x + 1.0, y, 0.0]);
        coords.push([x, y + 1.0, 0.0]);
        cells.push((ElementTag::Triangle, vec![3 * i, 3 * i + 1, 3 * i + 2]));
    }
    CoarseGridBuilder::from_arrays(&coords, &cells, rank).unwrap()
}

fn run_ranks<F, R>(comms: Vec<LocalComm>, f: F) -> Vec<R>
where
    F: Fn(LocalComm) -> R + Send + Sync + Clone + 'static,
    R: Send + 'static,
{
    let handles: Vec<_> = comms
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            std::thread::spawn(move || f(comm))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
#[serial]
fn five_ranks_hundred_elements_balance_out() {
    let comms = LocalUniverse::comms(5);
    let cfg = BalanceConfig {
        minlevel: 0,
        cluster_depth: 2,
        size_threshold: 20,
        elements_per_proc: 50,
        strategy: PartitionStrategy::Linear,
        kl_refine: false,
        rng_seed: 42,
    };
    let results = run_ranks(comms, move |comm| {
        let rank = comm.rank();
        let mut forest = strip_forest(rank, 100);
        let mut ctx = BalancerContext::new(comm, Vec::new());
        let plan = balance(&mut forest, &cfg, &mut ctx).expect("pass commits");
        let dests: Vec<Rank> = forest
            .element_ids()
            .map(|id| forest.element(id).unwrap().destination)
            .collect();
        (rank, plan, dests)
    });

    // every destination's element count hits the water level exactly:
    // 500 unit clusters over a 2x2 grid fit (4 cells <= 5 ranks)
    let mut per_dest: HashMap<Rank, usize> = HashMap::new();
    for (_, _, dests) in &results {
        for &d in dests {
            *per_dest.entry(d).or_default() += 1;
        }
    }
    assert_eq!(per_dest.len(), 4, "expected a 2x2 grid fit: {per_dest:?}");
    for (&dest, &count) in &per_dest {
        assert!(dest < 5);
        assert_eq!(count, 125, "destination {dest}");
    }

    // migration plans list exactly the elements whose owner changes
    for (rank, plan, dests) in &results {
        let moving = dests.iter().filter(|&&d| d != *rank).count();
        assert_eq!(plan.moves.len(), moving);
        for m in &plan.moves {
            assert_eq!(m.old_owner, *rank);
            assert_ne!(m.new_owner, *rank);
        }
        // bounds partition the moves cluster-contiguously
        assert_eq!(*plan.cluster_bounds.last().unwrap(), plan.moves.len());
    }
}

#[test]
#[serial]
fn injected_oom_aborts_identically_and_rolls_back() {
    let comms = LocalUniverse::comms(2);
    let cfg = BalanceConfig::default();
    let results = run_ranks(comms, move |comm| {
        let rank = comm.rank();
        let mut forest = strip_forest(rank, 4);
        let before = forest.ownership_snapshot();
        // rank 1's cluster arena cannot hold a single cluster
        let mut ctx = if rank == 1 {
            BalancerContext::with_cluster_capacity(comm, Vec::new(), 0)
        } else {
            BalancerContext::new(comm, Vec::new())
        };
        let err = balance(&mut forest, &cfg, &mut ctx).unwrap_err();
        let after = forest.ownership_snapshot();
        (rank, err, before, after)
    });
    for (rank, err, before, after) in results {
        // both ranks observe the same abort class through the verdict
        assert!(
            matches!(err, BalanceError::OutOfMemory),
            "rank {rank} saw {err:?}"
        );
        assert_eq!(err.code(), 4);
        // ownership is bit-for-bit untouched
        assert_eq!(before, after, "rank {rank}");
    }
}

#[test]
#[serial]
fn empty_forests_report_nothing_to_balance() {
    let comms = LocalUniverse::comms(3);
    let cfg = BalanceConfig::default();
    let results = run_ranks(comms, move |comm| {
        let mut forest = ElementForest::new();
        let mut ctx = BalancerContext::new(comm, Vec::new());
        balance(&mut forest, &cfg, &mut ctx).unwrap_err()
    });
    for err in results {
        assert!(matches!(err, BalanceError::NothingToBalance));
        assert_eq!(err.code(), 1);
    }
}

#[test]
fn single_rank_pass_commits_without_moves() {
    let mut forest = strip_forest(0, 30);
    let cfg = BalanceConfig::default();
    let mut ctx = BalancerContext::new(NoComm, Vec::new());
    let plan = balance(&mut forest, &cfg, &mut ctx).unwrap();
    assert!(plan.is_empty());
    for id in forest.element_ids() {
        assert_eq!(forest.element(id).unwrap().destination, 0);
    }
}

#[test]
#[serial]
fn refined_forest_moves_whole_clusters() {
    // rank 0 refines heavily, rank 1 stays coarse; the refined families
    // must stay cluster-contiguous wherever they land
    let comms = LocalUniverse::comms(2);
    let cfg = BalanceConfig {
        elements_per_proc: 10,
        strategy: PartitionStrategy::Inertial,
        ..BalanceConfig::default()
    };
    let results = run_ranks(comms, move |comm| {
        let rank = comm.rank();
        let mut forest = strip_forest(rank, 8);
        if rank == 0 {
            let roots: Vec<ElementId> = forest.element_ids().collect();
            for id in roots {
                mark_full_refinement(&mut forest, id).unwrap();
                apply_refinement(&mut forest, id).unwrap();
            }
        }
        let mut ctx = BalancerContext::new(comm, Vec::new());
        let plan = balance(&mut forest, &cfg, &mut ctx).expect("pass commits");

        // within one family every element shares the same destination
        let mut family_ok = true;
        for id in forest.element_ids() {
            let e = forest.element(id).unwrap();
            if let Some(parent) = e.parent {
                let p = forest.element(parent).unwrap();
                family_ok &= p.destination == e.destination;
            }
        }
        (rank, plan, family_ok)
    });
    for (rank, _plan, family_ok) in results {
        assert!(family_ok, "rank {rank}: a family was split across ranks");
    }
}
