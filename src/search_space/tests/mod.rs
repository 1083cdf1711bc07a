use crate::assert_err;
use crate::errors::NasError;
use crate::search_space::{
    Edge, Rollout, RolloutType, SearchSpace, SearchSpaceConfig, group_and_sort_by_to_node,
};

fn small_config() -> SearchSpaceConfig {
    SearchSpaceConfig {
        num_layers: 3,
        num_steps: 2,
        ..Default::default()
    }
}

#[test]
fn test_group_and_sort_by_to_node() {
    let genotype = vec![
        Edge::new("conv_1x1", 2, 3),
        Edge::new("skip_connect", 1, 2),
        Edge::new("avg_pool_3x3", 0, 3),
        Edge::new("none", 0, 2),
    ];
    let grouped = group_and_sort_by_to_node(&genotype);
    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped[0].0, 2);
    assert_eq!(
        grouped[0].1,
        [Edge::new("none", 0, 2), Edge::new("skip_connect", 1, 2)]
    );
    assert_eq!(grouped[1].0, 3);
    assert_eq!(
        grouped[1].1.iter().map(|e| e.from).collect::<Vec<_>>(),
        [0, 2]
    );
    assert!(group_and_sort_by_to_node(&[]).is_empty());
}

#[test]
fn test_default_layout() {
    let space = SearchSpace::from_config(&SearchSpaceConfig::default()).unwrap();
    // 8层：降采样单元位于第2层和第5层
    assert_eq!(space.cell_layout(), &[0, 0, 1, 0, 0, 1, 0, 0]);
    assert!(space.is_reduce_cell(2));
    assert!(!space.is_reduce_cell(0));
    assert_eq!(space.primitives().len(), 5);

    let space = SearchSpace::from_config(&small_config()).unwrap();
    assert_eq!(space.cell_layout(), &[0, 1, 1]);
}

#[test]
fn test_config_errors() {
    let bad_layout = SearchSpaceConfig {
        cell_layout: Some(vec![0, 1]),
        ..small_config()
    };
    assert_err!(SearchSpace::from_config(&bad_layout), NasError::Config(_));

    let bad_group = SearchSpaceConfig {
        cell_layout: Some(vec![0, 2, 0]),
        ..small_config()
    };
    assert_err!(SearchSpace::from_config(&bad_group), NasError::Config(_));

    let three_groups = SearchSpaceConfig {
        num_cell_groups: 3,
        ..small_config()
    };
    assert_err!(SearchSpace::from_config(&three_groups), NasError::Config(_));

    let unknown = SearchSpaceConfig {
        shared_primitives: vec!["dil_conv_5x5".to_string()],
        ..small_config()
    };
    assert_err!(
        SearchSpace::from_config(&unknown),
        NasError::UnknownPrimitive(p) if p == "dil_conv_5x5"
    );

    let no_steps = SearchSpaceConfig {
        num_steps: 0,
        ..small_config()
    };
    assert_err!(SearchSpace::from_config(&no_steps), NasError::Config(_));
}

#[test]
fn test_config_from_json_with_defaults() {
    let config: SearchSpaceConfig =
        serde_json::from_str(r#"{"num_layers": 5, "cell_layout": [0, 1, 0, 1, 0]}"#).unwrap();
    assert_eq!(config.num_steps, 4);
    let space = SearchSpace::from_config(&config).unwrap();
    assert_eq!(space.num_layers(), 5);
    assert!(space.is_reduce_cell(3));
}

#[test]
fn test_validate_genotypes() {
    let space = SearchSpace::from_config(&small_config()).unwrap();
    let good = vec![
        Edge::new("conv_1x1", 0, 2),
        Edge::new("skip_connect", 1, 2),
        Edge::new("avg_pool_3x3", 2, 3),
    ];
    assert!(space.validate_genotypes(&[good.clone(), good.clone()]).is_ok());

    assert_err!(
        space.validate_genotypes(&[good.clone()]),
        NasError::InvalidGenotype(_)
    );

    // 节点3没有入边
    let missing = vec![Edge::new("conv_1x1", 0, 2)];
    assert_err!(
        space.validate_genotypes(&[good.clone(), missing]),
        NasError::InvalidGenotype(msg) if msg.contains('3')
    );

    let backward = vec![Edge::new("conv_1x1", 3, 2), Edge::new("conv_1x1", 0, 3)];
    assert_err!(
        space.validate_genotypes(&[good.clone(), backward]),
        NasError::InvalidGenotype(_)
    );

    let unknown = vec![Edge::new("sep_conv_3x3", 0, 2), Edge::new("conv_1x1", 0, 3)];
    assert_err!(
        space.validate_genotypes(&[good, unknown]),
        NasError::UnknownPrimitive(_)
    );
}

#[test]
fn test_rollout_cell_genotypes_skip_concat() {
    let genotype = vec![Edge::new("conv_1x1", 0, 2)];
    let rollout = Rollout::new(vec![
        ("normal_0".to_string(), genotype.clone()),
        ("normal_0_concat".to_string(), Vec::new()),
        ("reduce_1".to_string(), genotype.clone()),
    ]);
    assert_eq!(rollout.rollout_type(), RolloutType::Discrete);
    assert_eq!(rollout.genotype_list().len(), 3);
    assert_eq!(rollout.cell_genotypes(), vec![genotype.clone(), genotype]);
}

#[test]
fn test_rollout_type_parse() {
    assert_eq!("discrete".parse::<RolloutType>().unwrap(), RolloutType::Discrete);
    assert_eq!(RolloutType::Differentiable.to_string(), "differentiable");
    assert_err!(
        "continuous".parse::<RolloutType>(),
        NasError::UnsupportedRolloutType(_)
    );
}
