//! Comparison pipeline: undersample the ground truth, obtain sensitivity maps, then score the
//! zero-filled input and every model in the model root against the fully sampled image.

use crate::data_import::{load_complex_array, load_kspace, save_npy, write_cfl};
use crate::error::{ReconError, Result};
use crate::mask::{apply_mask, poisson};
use crate::metrics::{compute_metrics, Metrics};
use crate::model::{discover_models, ModelLoader, ModelSpec};
use crate::render::{show_view, write_mask_png, write_views_png};
use crate::sensemap::{check_sensemap, estimate_sensemap, expand_maps_axis};
use crate::signal_model::{ifft3c, sum_of_squares};
use crate::{CompareArgs, CompareParams, RunContext};
use ndarray::{Array2, Array4};
use num_complex::Complex32;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct ModelReport {
    pub name: String,
    pub metrics: Metrics,
}

/// Summary of a comparison run, written to `metrics.json`. Non-finite values (the PSNR of a
/// perfect reconstruction) serialize as null.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub shape: Vec<usize>,
    pub target_acceleration: f64,
    pub achieved_acceleration: f64,
    pub input: Metrics,
    pub models: Vec<ModelReport>,
}

pub fn compare_exec(
    ctx: &RunContext,
    args: &CompareArgs,
    params: &CompareParams,
    loader: &dyn ModelLoader,
) -> Result<Report> {
    if args.batch_size == 0 {
        return Err(ReconError::InvalidParameter("batch size must be at least 1".to_string()));
    }
    let out_dir = args.output_dir.as_path();
    if !out_dir.exists() {
        fs::create_dir_all(out_dir)?;
    }
    info!("using device {}", ctx.device);

    info!("loading k-space data from {} ...", args.kspace_truth.display());
    let kspace_truth = load_kspace(&args.kspace_truth)?;
    let (num_channels, shape_z, shape_y, _) = kspace_truth.dim();
    info!("k-space shape: {:?}", kspace_truth.shape());

    info!("generating and applying sampling mask (R={}) ...", params.acceleration);
    let mask = poisson(
        [shape_z, shape_y],
        params.acceleration,
        [params.calibration; 2],
        params.seed,
        &params.poisson_options(),
    )?;
    let achieved_acceleration = acceleration_of(&mask);
    info!("  achieved acceleration: {:.3}", achieved_acceleration);
    let file_png = out_dir.join("mask.png");
    info!("  writing mask png to {} ...", file_png.display());
    write_mask_png(&file_png, &mask)?;

    let kspace_input = apply_mask(&kspace_truth, &mask)?;
    let file_input = out_dir.join("kspace_input.npy");
    info!("  writing input data to {} ...", file_input.display());
    save_npy(&file_input, &kspace_input)?;
    if params.write_cfl {
        write_cfl(out_dir.join("kspace_input"), &kspace_input)?;
    }

    let sensemap = match &args.sensemap {
        Some(path) => {
            info!("loading sensitivity maps from {} ...", path.display());
            load_complex_array(path)?
        }
        None => {
            info!("estimating sensitivity maps (calibration {}) ...", params.calibration);
            let maps = estimate_sensemap(&kspace_input, params.calibration)?;
            save_npy(out_dir.join("sensemap.npy"), &maps)?;
            maps.into_dyn()
        }
    };
    let sensemap = expand_maps_axis(sensemap)?;
    check_sensemap(&sensemap, kspace_truth.shape())?;

    info!("generating truth comparison ...");
    let image_truth = ifft3c(&kspace_truth);
    write_views(ctx, out_dir, "truth", "Truth", &image_truth)?;

    info!("generating input comparison ...");
    let image_input = ifft3c(&kspace_input);
    let input_metrics = compute_metrics(&image_truth, &image_input)?;
    log_metrics("Input", &input_metrics);
    write_views(ctx, out_dir, "input", "Input", &image_input)?;
    drop(image_input);

    let models = discover_models(&args.model_root_dir)?;
    info!("found {} models in {}", models.len(), args.model_root_dir.display());

    let mut model_reports = Vec::with_capacity(models.len());
    for entry in &models {
        info!("inference using model {} ...", entry.name);
        let spec = ModelSpec {
            path: entry.path.clone(),
            channels: num_channels,
            shape_z,
            shape_y,
            batch_size: args.batch_size,
            log_level: ctx.log_level,
            device: ctx.device.clone(),
        };

        // the model only lives for its own inference
        let kspace_output = {
            info!("  setting up model from {} ...", entry.path.display());
            let mut model = loader.load(&spec)?;
            info!("  running inference ...");
            model.run(kspace_input.clone(), &sensemap)?
        };
        if kspace_output.shape() != kspace_truth.shape() {
            return Err(ReconError::shape_mismatch(
                "model output k-space",
                kspace_truth.shape(),
                kspace_output.shape(),
            ));
        }

        let file_out = out_dir.join(format!("kspace_{}.npy", entry.name));
        info!("  writing results to {} ...", file_out.display());
        save_npy(&file_out, &kspace_output)?;
        if params.write_cfl {
            write_cfl(out_dir.join(format!("kspace_{}", entry.name)), &kspace_output)?;
        }

        info!("  generating output comparison ...");
        let image_output = ifft3c(&kspace_output);
        let metrics = compute_metrics(&image_truth, &image_output)?;
        log_metrics(&entry.name, &metrics);
        write_views(ctx, out_dir, &entry.name, &entry.name, &image_output)?;
        model_reports.push(ModelReport { name: entry.name.clone(), metrics });
    }

    let report = Report {
        shape: kspace_truth.shape().to_vec(),
        target_acceleration: params.acceleration,
        achieved_acceleration,
        input: input_metrics,
        models: model_reports,
    };
    fs::write(out_dir.join("metrics.json"), serde_json::to_string_pretty(&report)?)?;

    info!("Finished");
    Ok(report)
}

/// renders the coil-combined image and optionally displays its first view
fn write_views(ctx: &RunContext, out_dir: &Path, base: &str, title: &str, image: &Array4<Complex32>) -> Result<()> {
    let sos = sum_of_squares(image, 0);
    let [sag, _, _] = write_views_png(out_dir.join(base), &sos)?;
    if ctx.plot {
        show_view(&sag, title);
    }
    Ok(())
}

fn log_metrics(name: &str, m: &Metrics) {
    info!("{}: PSNR: {}, NRMSE: {}, SSIM: {}", name, m.psnr, m.nrmse, m.ssim);
}

/// fully sampled size over the number of sampled locations
fn acceleration_of(mask: &Array2<Complex32>) -> f64 {
    let sampled = mask.iter().filter(|v| **v != Complex32::ZERO).count();
    mask.len() as f64 / sampled.max(1) as f64
}

#[cfg(test)]
mod tests {
    use crate::compare::compare_exec;
    use crate::data_import::save_npy;
    use crate::error::{ReconError, Result};
    use crate::mask::{apply_mask, poisson, PoissonOptions};
    use crate::metrics::compute_metrics;
    use crate::model::{ModelLoader, ModelSpec, ReconModel};
    use crate::sensemap::expand_maps_axis;
    use crate::signal_model::ifft3c;
    use crate::test_data::phantom_kspace;
    use crate::unrolled::{UnrolledLoader, MODEL_PARAMS_FILE};
    use crate::{CompareArgs, CompareParams, RunContext};
    use ndarray::{Array4, Array5, ArrayD, IxDyn};
    use num_complex::Complex32;
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;
    use std::rc::Rc;
    use tracing::Level;

    fn small_params() -> CompareParams {
        CompareParams {
            acceleration: 3.,
            calibration: 6,
            ..Default::default()
        }
    }

    fn ctx() -> RunContext {
        RunContext { log_level: Level::WARN, device: "0".to_string(), plot: false }
    }

    fn args(root: &Path, truth: &Path, out: &Path) -> CompareArgs {
        CompareArgs {
            model_root_dir: root.to_path_buf(),
            kspace_truth: truth.to_path_buf(),
            output_dir: out.to_path_buf(),
            sensemap: None,
            device: "0".to_string(),
            batch_size: 3,
            verbose: false,
            plot: false,
            logfile: None,
            params: None,
        }
    }

    /// returns its input unchanged and remembers what it was given
    struct Passthrough {
        seen: Rc<RefCell<Vec<Array4<Complex32>>>>,
    }

    impl ReconModel for Passthrough {
        fn run(&mut self, kspace: Array4<Complex32>, _sensemap: &Array5<Complex32>) -> Result<Array4<Complex32>> {
            self.seen.borrow_mut().push(kspace.clone());
            Ok(kspace)
        }
    }

    #[derive(Default)]
    struct PassthroughLoader {
        seen: Rc<RefCell<Vec<Array4<Complex32>>>>,
        specs: RefCell<Vec<ModelSpec>>,
    }

    impl ModelLoader for PassthroughLoader {
        fn load(&self, spec: &ModelSpec) -> Result<Box<dyn ReconModel>> {
            self.specs.borrow_mut().push(spec.clone());
            Ok(Box::new(Passthrough { seen: self.seen.clone() }))
        }
    }

    struct Cropping;

    impl ReconModel for Cropping {
        fn run(&mut self, kspace: Array4<Complex32>, _sensemap: &Array5<Complex32>) -> Result<Array4<Complex32>> {
            let (c, z, y, x) = kspace.dim();
            Ok(Array4::zeros((c, z, y, x - 1)))
        }
    }

    struct CroppingLoader;

    impl ModelLoader for CroppingLoader {
        fn load(&self, _spec: &ModelSpec) -> Result<Box<dyn ReconModel>> {
            Ok(Box::new(Cropping))
        }
    }

    fn setup(models: &[&str]) -> (tempfile::TempDir, CompareArgs) {
        let dir = tempfile::tempdir().unwrap();
        let truth = dir.path().join("truth.npy");
        save_npy(&truth, &phantom_kspace(4, [16, 16, 12])).unwrap();
        let root = dir.path().join("models");
        fs::create_dir(&root).unwrap();
        for m in models {
            fs::create_dir(root.join(m)).unwrap();
            fs::write(root.join(m).join(MODEL_PARAMS_FILE), "iterations = 2\n").unwrap();
        }
        let a = args(&root, &truth, &dir.path().join("out"));
        (dir, a)
    }

    fn count_files(dir: &Path, pred: impl Fn(&str) -> bool) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| pred(&e.file_name().to_string_lossy()))
            .count()
    }

    #[test]
    fn two_models_produce_two_sets_of_outputs() {
        let (_dir, args) = setup(&["net_b", "net_a"]);
        let report = compare_exec(&ctx(), &args, &small_params(), &UnrolledLoader).unwrap();

        let names = report.models.iter().map(|m| m.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["net_a", "net_b"]);
        // 256 / 36 would mean only the calibration box was sampled
        assert!((report.achieved_acceleration - 3.).abs() < 0.5, "R {}", report.achieved_acceleration);

        let out = args.output_dir.as_path();
        for f in ["mask.png", "kspace_input.npy", "sensemap.npy", "metrics.json"] {
            assert!(out.join(f).is_file(), "missing {f}");
        }
        assert_eq!(count_files(out, |n| n.starts_with("kspace_net_") && n.ends_with(".npy")), 2);
        assert_eq!(count_files(out, |n| n.starts_with("net_") && n.ends_with(".png")), 6);
        for v in ["sag", "cor", "ax"] {
            assert!(out.join(format!("truth_{v}.png")).is_file());
            assert!(out.join(format!("input_{v}.png")).is_file());
        }
        assert!(!out.join("kspace_input.cfl").exists());

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(out.join("metrics.json")).unwrap()).unwrap();
        assert_eq!(json["models"].as_array().unwrap().len(), 2);
        assert_eq!(json["shape"], serde_json::json!([4, 16, 16, 12]));
    }

    #[test]
    fn every_model_gets_the_same_input() {
        let (_dir, args) = setup(&["one", "two"]);
        let loader = PassthroughLoader::default();
        let report = compare_exec(&ctx(), &args, &small_params(), &loader).unwrap();

        let seen = loader.seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);

        let specs = loader.specs.borrow();
        assert_eq!((specs[0].channels, specs[0].shape_z, specs[0].shape_y), (4, 16, 16));
        assert_eq!(specs[0].batch_size, 3);
        assert!(specs[0].path.ends_with("one"));

        // an identity model reproduces the zero-filled input
        for m in &report.models {
            assert_eq!(m.metrics, report.input);
        }
    }

    #[test]
    fn cfl_export_and_supplied_sensemap() {
        let (dir, mut args) = setup(&["only"]);
        let maps = ArrayD::<Complex32>::from_elem(IxDyn(&[4, 16, 16, 12]), Complex32::new(0.5, 0.));
        let maps_file = dir.path().join("maps.npy");
        save_npy(&maps_file, &maps).unwrap();
        args.sensemap = Some(maps_file);

        let params = CompareParams { write_cfl: true, ..small_params() };
        compare_exec(&ctx(), &args, &params, &PassthroughLoader::default()).unwrap();

        let out = args.output_dir.as_path();
        assert!(!out.join("sensemap.npy").exists());
        for f in ["kspace_input.cfl", "kspace_input.hdr", "kspace_only.cfl", "kspace_only.hdr"] {
            assert!(out.join(f).is_file(), "missing {f}");
        }
    }

    #[test]
    fn mismatched_inputs_abort_the_run() {
        let (dir, mut args) = setup(&["m"]);
        let err = compare_exec(&ctx(), &args, &small_params(), &CroppingLoader).unwrap_err();
        assert!(matches!(err, ReconError::ShapeMismatch { .. }));

        let maps_file = dir.path().join("bad_maps.npy");
        save_npy(&maps_file, &Array4::<Complex32>::zeros((4, 16, 16, 8))).unwrap();
        args.sensemap = Some(maps_file);
        let err = compare_exec(&ctx(), &args, &small_params(), &PassthroughLoader::default()).unwrap_err();
        assert!(matches!(err, ReconError::ShapeMismatch { .. }));

        args.sensemap = None;
        args.batch_size = 0;
        let err = compare_exec(&ctx(), &args, &small_params(), &PassthroughLoader::default()).unwrap_err();
        assert!(matches!(err, ReconError::InvalidParameter(_)));
    }

    #[test]
    fn full_size_scenario_degrades_input() {
        let params = CompareParams::default();
        let truth = phantom_kspace(8, [64, 64, 64]);
        let mask = poisson(
            [64, 64],
            params.acceleration,
            [params.calibration; 2],
            params.seed,
            &PoissonOptions::default(),
        )
        .unwrap();
        assert_eq!(mask.dim(), (64, 64));
        let sampled = mask.iter().filter(|v| **v != Complex32::ZERO).count();
        let r = 4096. / sampled as f64;
        assert!(r > 8. && r <= 4096. / 400., "acceleration {r}");

        let input = apply_mask(&truth, &mask).unwrap();
        let metrics = compute_metrics(&ifft3c(&truth), &ifft3c(&input)).unwrap();
        assert!(metrics.ssim < 1., "ssim {}", metrics.ssim);
        assert!(metrics.nrmse > 0.);

        let maps = expand_maps_axis(ArrayD::<Complex32>::zeros(IxDyn(&[8, 64, 64, 64]))).unwrap();
        assert_eq!(maps.shape(), &[1, 8, 64, 64, 64]);
    }
}
