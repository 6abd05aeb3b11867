use mnist_mlp::config::{Config, ModelConfig};
use mnist_mlp::model::neural_net::NeuralNet;
use mnist_mlp::model::Model;
use mnist_mlp::parsing::mnist;
use mnist_mlp::plot;
use mnist_mlp::training::{Trainer, TrainingLog};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Write as _;
use std::path::PathBuf;

fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("mnist_mlp_e2e_{}_{}", std::process::id(), name))
}

/// Rows of uniform random pixels with labels cycling 0..=9
fn write_synthetic_csv(path: &PathBuf, rows: usize, rng: &mut StdRng) {
    let mut contents = String::new();
    for row in 0..rows {
        write!(contents, "{}", row % 10).unwrap();
        for _ in 0..784 {
            write!(contents, ",{}", rng.gen_range(0..=255)).unwrap();
        }
        contents.push('\n');
    }
    std::fs::write(path, contents).unwrap();
}

fn train_once(train_path: &PathBuf, test_path: &PathBuf) -> (TrainingLog, NeuralNet) {
    let config = Config {
        batch_size: 10,
        num_epochs: 2,
        ..Config::default()
    };
    let mut rng = StdRng::seed_from_u64(config.seed);
    let train = mnist::parse_dataset(train_path).unwrap();
    let test = mnist::parse_dataset(test_path).unwrap();
    assert_eq!((train.len(), test.len()), (100, 20));

    let mut net = NeuralNet::new(ModelConfig::default(), &mut rng).unwrap();
    let mut trainer = Trainer::new(config).unwrap();
    trainer.run(&mut net, &train, &test, &mut rng).unwrap();

    (trainer.into_log(), net)
}

#[test]
fn two_epochs_on_synthetic_data() {
    let mut rng = StdRng::seed_from_u64(42);
    let train_path = scratch_path("train.csv");
    let test_path = scratch_path("test.csv");
    write_synthetic_csv(&train_path, 100, &mut rng);
    write_synthetic_csv(&test_path, 20, &mut rng);

    let (log, net) = train_once(&train_path, &test_path);
    let (again, _) = train_once(&train_path, &test_path);

    assert_eq!(log.len(), 2);
    for record in log.records() {
        assert!(record.train_loss.is_finite() && record.train_loss >= 0.0);
        assert!(record.test_loss.is_finite() && record.test_loss >= 0.0);
        assert!((0.0..=100.0).contains(&record.accuracy));
    }
    // same seed, same data, same log
    assert_eq!(log, again);

    let plot_path = scratch_path("loss.png");
    let log_path = scratch_path("log.csv");
    let weight_path = scratch_path("weights.json");
    plot::plot_losses(&log, &plot_path).unwrap();
    log.write_csv(&log_path).unwrap();
    net.save(&weight_path).unwrap();

    let restored = NeuralNet::load(&weight_path, ModelConfig::default()).unwrap();
    let test = mnist::parse_dataset(&test_path).unwrap();
    let expected = net.predict(&test.data.view()).unwrap();
    let actual = restored.predict(&test.data.view()).unwrap();
    assert!(expected
        .iter()
        .zip(actual.iter())
        .all(|(a, b)| (a - b).abs() < 1e-9));

    let csv_lines = std::fs::read_to_string(&log_path).unwrap().lines().count();
    assert_eq!(csv_lines, 3);
    assert!(std::fs::metadata(&plot_path).unwrap().len() > 0);

    for path in [train_path, test_path, plot_path, log_path, weight_path] {
        std::fs::remove_file(path).unwrap();
    }
}
