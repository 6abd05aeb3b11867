use anyhow::Result;
use clap::Parser;
use mnist_mlp::config::{Config, ModelConfig};
use mnist_mlp::model::neural_net::NeuralNet;
use mnist_mlp::parsing::mnist;
use mnist_mlp::plot;
use mnist_mlp::training::Trainer;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Train the MNIST MLP. Hyperparams are fixed; only file locations can be changed
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The path of the training dataset
    #[arg(long, default_value = "./mnist_train.csv")]
    train_path: String,

    /// The path of the test dataset
    #[arg(long, default_value = "./mnist_test.csv")]
    test_path: String,

    /// Where to save the train/test loss curves
    #[arg(long, default_value = "train_test_loss.png")]
    plot_path: String,

    /// Where to export the model's weights. Weights are exported in JSON format
    #[arg(long, default_value = "mnist_001.json")]
    weight_path: String,

    /// Also save the per-epoch log in a "epoch,train_loss,test_loss,accuracy" format
    #[arg(long, default_value = None)]
    log_path: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mnist_mlp=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Config::default();
    let model_config = ModelConfig::default();
    let mut rng = StdRng::seed_from_u64(config.seed);

    // ndarray runs on the CPU; there is no accelerator to fall back from
    tracing::info!("Using device: cpu");

    let train_dataset = mnist::parse_dataset(&args.train_path)?;
    let test_dataset = mnist::parse_dataset(&args.test_path)?;
    tracing::info!(
        "Loaded {} training and {} test samples",
        train_dataset.len(),
        test_dataset.len()
    );

    let mut neural_net = NeuralNet::new(model_config, &mut rng)?;
    tracing::info!("# Params: {}", neural_net.num_parameters());

    let mut trainer = Trainer::new(config)?;
    let log = trainer.run(&mut neural_net, &train_dataset, &test_dataset, &mut rng)?;
    tracing::info!("{:?}", log.records());

    plot::plot_losses(log, &args.plot_path)?;
    if let Some(log_path) = &args.log_path {
        log.write_csv(log_path)?;
    }

    neural_net.save(&args.weight_path)?;
    tracing::info!("Weights saved to {}", args.weight_path);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn weight_path_help_names_the_format() {
        let command = Args::command();
        let weight_path = command
            .get_arguments()
            .find(|arg| arg.get_id() == "weight_path")
            .unwrap();

        assert_eq!(
            weight_path.get_help().unwrap().to_string(),
            "Where to export the model's weights. Weights are exported in JSON format"
        );
    }
}
