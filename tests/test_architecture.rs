//! Tests for architecture parsing and network building
//!
//! This file tests the architecture module including:
//! - Loading the bundled conv/pool architecture
//! - Rejecting unknown layer types, broken shape chains and empty stacks
//! - Building networks and running forward and backward passes through them
//! - Cache validation in `Network::backward`

use approx::assert_relative_eq;
use rust_cnn_kernels::architecture::{
    build_network, load_architecture, parse_architecture, LayerCache, LayerSpec, NetworkLayer,
};
use rust_cnn_kernels::config::{ConvParams, PoolParams};
use rust_cnn_kernels::tensor::{Shape4, Tensor};
use rust_cnn_kernels::utils::SimpleRng;
use rust_cnn_kernels::KernelError;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_temp_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("failed to create temp file");
    file.write_all(contents.as_bytes())
        .expect("failed to write temp config");
    file
}

const SMALL_ARCHITECTURE: &str = r#"{
  "input_channels": 2,
  "input_height": 6,
  "input_width": 6,
  "layers": [
    { "layer_type": "conv", "out_channels": 3, "kernel_size": 3, "pad": 1 },
    { "layer_type": "max_pool", "pool_height": 2, "pool_width": 2, "stride": 2 }
  ]
}"#;

// ============================================================================
// Valid Architecture Loading Tests
// ============================================================================

mod valid_architecture_tests {
    use super::*;

    #[test]
    fn test_load_bundled_conv_pool() {
        let config = load_architecture("config/architectures/conv_pool.json").unwrap();

        assert_eq!(config.layers.len(), 4);
        assert_eq!(config.input_shape(), Shape4::new(1, 3, 32, 32));
        assert_eq!(config.output_shape().unwrap(), Shape4::new(1, 32, 8, 8));

        let specs = config.layer_specs().unwrap();
        assert_eq!(
            specs[0],
            LayerSpec::Conv {
                out_channels: 16,
                kernel_height: 5,
                kernel_width: 5,
                params: ConvParams::new(1, 2).unwrap(),
            }
        );
        assert_eq!(
            specs[1],
            LayerSpec::MaxPool(PoolParams::new(2, 2, 2).unwrap())
        );
    }

    #[test]
    fn test_load_from_temp_file() {
        let temp_file = write_temp_config(SMALL_ARCHITECTURE);
        let config = load_architecture(temp_file.path()).unwrap();

        assert_eq!(config.layers[0].layer_type, "conv");
        assert_eq!(config.layers[0].out_channels, Some(3));
        assert_eq!(config.layers[1].layer_type, "max_pool");
        assert_eq!(config.output_shape().unwrap(), Shape4::new(1, 3, 3, 3));
    }

    #[test]
    fn test_rectangular_kernel_and_stride() {
        let config = parse_architecture(
            r#"{
  "input_channels": 1,
  "input_height": 7,
  "input_width": 9,
  "layers": [
    { "layer_type": "Conv2D", "out_channels": 2, "kernel_height": 3, "kernel_width": 1, "stride": 2 }
  ]
}"#,
        )
        .unwrap();

        // H: 1 + (7 - 3) / 2 = 3, W: 1 + (9 - 1) / 2 = 5
        assert_eq!(config.output_shape().unwrap(), Shape4::new(1, 2, 3, 5));
    }
}

// ============================================================================
// Invalid Architecture Tests
// ============================================================================

mod invalid_architecture_tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let result = load_architecture("nonexistent_architecture.json");
        assert!(matches!(result, Err(KernelError::Io(_))));
    }

    #[test]
    fn test_malformed_json() {
        let temp_file = write_temp_config("{ \"layers\": [");
        assert!(matches!(
            load_architecture(temp_file.path()),
            Err(KernelError::Json(_))
        ));
    }

    #[test]
    fn test_unknown_layer_type_names_value() {
        let err = parse_architecture(
            r#"{
  "input_channels": 1, "input_height": 4, "input_width": 4,
  "layers": [ { "layer_type": "avg_pool", "pool_height": 2, "pool_width": 2, "stride": 2 } ]
}"#,
        )
        .unwrap_err();

        match &err {
            KernelError::InvalidMode { value, .. } => assert_eq!(value, "avg_pool"),
            other => panic!("unexpected error: {}", other),
        }
        assert!(err.to_string().contains("avg_pool"));
    }

    #[test]
    fn test_empty_layers() {
        let err = parse_architecture(
            r#"{ "input_channels": 1, "input_height": 4, "input_width": 4, "layers": [] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_input_dimension() {
        let err = parse_architecture(
            r#"{
  "input_channels": 0, "input_height": 4, "input_width": 4,
  "layers": [ { "layer_type": "conv", "out_channels": 1, "kernel_size": 1 } ]
}"#,
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::InvalidConfig(_)));
    }

    #[test]
    fn test_shape_chain_break_names_layer() {
        // 4x4 -> pool 2 -> 2x2, then a 3x3 conv without padding cannot fit
        let err = parse_architecture(
            r#"{
  "input_channels": 1, "input_height": 4, "input_width": 4,
  "layers": [
    { "layer_type": "max_pool", "pool_height": 2, "pool_width": 2, "stride": 2 },
    { "layer_type": "conv", "out_channels": 1, "kernel_size": 3 }
  ]
}"#,
        )
        .unwrap_err();

        match err {
            KernelError::InvalidConfig(message) => assert!(message.contains("Layer 1")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_pool_field() {
        let err = parse_architecture(
            r#"{
  "input_channels": 1, "input_height": 4, "input_width": 4,
  "layers": [ { "layer_type": "max_pool", "pool_height": 2, "pool_width": 2 } ]
}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("stride"));
    }

    #[test]
    fn test_zero_conv_stride() {
        let err = parse_architecture(
            r#"{
  "input_channels": 1, "input_height": 4, "input_width": 4,
  "layers": [ { "layer_type": "conv", "out_channels": 1, "kernel_size": 1, "stride": 0 } ]
}"#,
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::InvalidParameter { .. }));
    }
}

// ============================================================================
// Network Tests
// ============================================================================

mod network_tests {
    use super::*;

    #[test]
    fn test_build_bundled_network() {
        let config = load_architecture("config/architectures/conv_pool.json").unwrap();
        let mut rng = SimpleRng::new(42);

        let network = build_network(&config, &mut rng).unwrap();

        assert_eq!(network.layers().len(), 4);
        assert_eq!(network.input_shape(), Shape4::new(1, 3, 32, 32));
        // 16 * 3 * 5 * 5 + 16 and 32 * 16 * 3 * 3 + 32
        assert_eq!(network.parameter_count(), 1216 + 4640);
        assert!(matches!(network.layers()[0], NetworkLayer::Conv(_)));
        assert!(matches!(network.layers()[1], NetworkLayer::MaxPool(_)));
    }

    #[test]
    fn test_second_conv_uses_previous_channels() {
        let config = load_architecture("config/architectures/conv_pool.json").unwrap();
        let network = build_network(&config, &mut SimpleRng::new(1)).unwrap();

        match &network.layers()[2] {
            NetworkLayer::Conv(conv) => {
                assert_eq!(conv.weights().shape(), Shape4::new(32, 16, 3, 3))
            }
            other => panic!("unexpected layer: {:?}", other),
        }
    }

    #[test]
    fn test_forward_backward_shapes() {
        let config = parse_architecture(SMALL_ARCHITECTURE).unwrap();
        let mut rng = SimpleRng::new(7);
        let mut network = build_network(&config, &mut rng).unwrap();
        let x = Tensor::random(Shape4::new(4, 2, 6, 6), -1.0, 1.0, &mut rng);

        let (out, caches) = network.forward(&x).unwrap();
        assert_eq!(out.shape(), Shape4::new(4, 3, 3, 3));
        assert_eq!(caches.len(), 2);
        assert!(matches!(caches[0], LayerCache::Conv(_)));
        assert!(matches!(caches[1], LayerCache::MaxPool(_)));

        let dout = Tensor::filled(out.shape(), 1.0);
        let dx = network.backward(&dout, caches).unwrap();
        assert_eq!(dx.shape(), x.shape());
    }

    #[test]
    fn test_forward_is_deterministic_for_seed() {
        let config = parse_architecture(SMALL_ARCHITECTURE).unwrap();
        let first = build_network(&config, &mut SimpleRng::new(3)).unwrap();
        let second = build_network(&config, &mut SimpleRng::new(3)).unwrap();
        let x = Tensor::random(Shape4::new(1, 2, 6, 6), -1.0, 1.0, &mut SimpleRng::new(9));

        let (a, _) = first.forward(&x).unwrap();
        let (b, _) = second.forward(&x).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_update_parameters_reduces_loss() {
        // loss = sum(out) / 2, so dout is a constant 0.5 and a small SGD step
        // must lower it
        let config = parse_architecture(SMALL_ARCHITECTURE).unwrap();
        let mut rng = SimpleRng::new(11);
        let mut network = build_network(&config, &mut rng).unwrap();
        let x = Tensor::random(Shape4::new(2, 2, 6, 6), -1.0, 1.0, &mut rng);

        let (out, caches) = network.forward(&x).unwrap();
        let loss_before = out.sum() * 0.5;
        network
            .backward(&Tensor::filled(out.shape(), 0.5), caches)
            .unwrap();
        network.update_parameters(1e-3);

        let (out_after, _) = network.forward(&x).unwrap();
        let loss_after = out_after.sum() * 0.5;
        assert!(
            loss_after < loss_before,
            "loss did not decrease: {} -> {}",
            loss_before,
            loss_after
        );
    }

    #[test]
    fn test_zero_gradient_leaves_parameters() {
        let config = parse_architecture(SMALL_ARCHITECTURE).unwrap();
        let mut rng = SimpleRng::new(5);
        let mut network = build_network(&config, &mut rng).unwrap();
        let x = Tensor::random(Shape4::new(1, 2, 6, 6), -1.0, 1.0, &mut rng);

        let (out, caches) = network.forward(&x).unwrap();
        network.backward(&Tensor::zeros(out.shape()), caches).unwrap();
        network.update_parameters(0.1);

        let (after, _) = network.forward(&x).unwrap();
        for (a, b) in out.data().iter().zip(after.data()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_backward_wrong_cache_count() {
        let config = parse_architecture(SMALL_ARCHITECTURE).unwrap();
        let mut rng = SimpleRng::new(2);
        let mut network = build_network(&config, &mut rng).unwrap();
        let x = Tensor::random(Shape4::new(1, 2, 6, 6), -1.0, 1.0, &mut rng);

        let (out, mut caches) = network.forward(&x).unwrap();
        caches.pop();

        assert!(matches!(
            network.backward(&out, caches),
            Err(KernelError::ShapeMismatch {
                operation: "Network::backward",
                ..
            })
        ));
    }

    #[test]
    fn test_backward_swapped_caches() {
        let config = parse_architecture(SMALL_ARCHITECTURE).unwrap();
        let mut rng = SimpleRng::new(2);
        let mut network = build_network(&config, &mut rng).unwrap();
        let x = Tensor::random(Shape4::new(1, 2, 6, 6), -1.0, 1.0, &mut rng);

        let (out, mut caches) = network.forward(&x).unwrap();
        caches.swap(0, 1);

        match network.backward(&out, caches) {
            Err(KernelError::CacheMismatch { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected result: {:?}", other.map(|t| t.shape())),
        }
    }
}
