use std::fs;

use glam::DMat4;
use surfing::{
    freesurfer, generate_sphere, run_voxel_selection, voxel_selection, voxel_selection_with,
    Dataset, DatasetView, DistanceMetric, GridGeometry, Neighborhood, Radius, SamplingParams,
    SelectionConfig, SparseAttributes, VolSurf, VolumeImage, VOXEL_LABEL,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn volsurf() -> VolSurf {
    let grid = GridGeometry::new(&[50, 50, 50], DMat4::IDENTITY).expect("grid");
    let sphere = generate_sphere(20);
    VolSurf::new(grid, &sphere * 25.0 + 25.0, &sphere * 20.0 + 25.0).expect("volsurf")
}

#[test]
fn selection_feeds_searchlight() {
    init_tracing();
    let vs = volsurf();
    let centers: Vec<usize> = (0..vs.nvertices()).step_by(7).collect();
    let selection = voxel_selection(
        &vs,
        Radius::Distance(6.0),
        Some(centers.as_slice()),
        DistanceMetric::Dijkstra,
        &SamplingParams::default(),
    )
    .expect("selection");
    assert_eq!(selection.keys(), centers.as_slice());

    let nbhood = Neighborhood::from_selection(&selection, VOXEL_LABEL).expect("nbhood");
    let mask = nbhood.mask();
    let covered = mask.iter().filter(|&&m| m).count();
    assert!(covered > 0);
    assert!(covered < vs.grid().nvoxels());

    let grid = vs.grid().clone();
    let volumes: Vec<VolumeImage> = (0..3)
        .map(|s| {
            let data = (0..grid.nvoxels()).map(|v| (v % 17) as f32 + s as f32).collect();
            VolumeImage::new(grid.clone(), data).expect("image")
        })
        .collect();
    let dataset = Dataset::from_volumes(&grid, &volumes, Some(mask.as_slice())).expect("dataset");
    assert_eq!(dataset.nsamples(), 3);
    assert_eq!(dataset.nfeatures(), covered);

    let size = |view: &DatasetView<'_>| -> Result<Vec<f64>, String> {
        Ok(vec![view.nfeatures() as f64])
    };
    let result = nbhood.searchlight(&dataset, &size, None).expect("searchlight");
    assert_eq!(result.centers, centers);
    for (center, values) in result.centers.iter().zip(&result.values) {
        let expected = selection.get(*center, VOXEL_LABEL).expect("center").len();
        assert_eq!(values, &vec![expected as f64]);
    }
}

#[test]
fn whole_surface_radius_stays_inside_the_band() {
    init_tracing();
    let vs = volsurf();
    let centers: Vec<usize> = (0..vs.nvertices()).step_by(40).collect();
    let band = vs
        .node_to_voxels(&SamplingParams::default())
        .expect("n2v")
        .voxels();
    for metric in [DistanceMetric::Dijkstra, DistanceMetric::Euclidean] {
        let selection = voxel_selection(
            &vs,
            Radius::Distance(100.0),
            Some(centers.as_slice()),
            metric,
            &SamplingParams::default(),
        )
        .expect("selection");
        assert_eq!(selection.len(), centers.len());

        let mask = Neighborhood::from_selection(&selection, VOXEL_LABEL)
            .expect("nbhood")
            .mask();
        let covered = mask.iter().filter(|&&m| m).count();
        assert!(covered < vs.grid().nvoxels(), "{metric}");
        assert_eq!(covered, band.len(), "{metric}");
        for &center in &centers {
            let voxels = selection.get(center, VOXEL_LABEL).expect("center");
            assert_eq!(voxels.len(), band.len(), "{metric} center {center}");
        }
    }
}

#[test]
fn file_based_run_matches_in_memory_run() {
    init_tracing();
    let vs = volsurf();
    let dir = tempfile::tempdir().expect("tempdir");
    let volume_path = dir.path().join("anat.nii");
    let outer_path = dir.path().join("pial.asc");
    let inner_path = dir.path().join("white.asc");
    let config_path = dir.path().join("selection.json");

    VolumeImage::empty(vs.grid().clone())
        .write_nifti(&volume_path, false)
        .expect("nifti");
    freesurfer::write(&outer_path, vs.outer(), false).expect("outer");
    freesurfer::write(&inner_path, vs.inner(), false).expect("inner");
    fs::write(
        &config_path,
        r#"{"radius": {"distance": 4.0}, "metric": "euclidian", "centers": [0, 5, 100, 250]}"#,
    )
    .expect("config");

    let config = SelectionConfig::load(&config_path).expect("load config");
    let from_files =
        run_voxel_selection(&volume_path, &outer_path, &inner_path, &config).expect("run");
    let in_memory = voxel_selection_with(&vs, &config).expect("selection");
    assert_eq!(from_files, in_memory);
    assert_eq!(from_files.keys(), &[0, 5, 100, 250]);
}

#[test]
fn saved_selection_round_trips() {
    init_tracing();
    let vs = volsurf();
    let config = SelectionConfig {
        radius: Radius::VoxelCount(25),
        centers: Some(vec![3, 30, 300]),
        ..SelectionConfig::default()
    };
    let selection = voxel_selection_with(&vs, &config).expect("selection");
    for &center in selection.keys() {
        assert_eq!(selection.get(center, VOXEL_LABEL).expect("center").len(), 25);
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("selection.json");
    selection.save(&path).expect("save");
    let loaded = SparseAttributes::load(&path).expect("load");
    assert_eq!(loaded, selection);

    let grid: GridGeometry = loaded.metadata_as("volgeom").expect("volgeom");
    assert_eq!(&grid, vs.grid());
}
