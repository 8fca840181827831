//! Domain enums shared by the jobs, the sweep driver and the CLI.
//!
//! Every enum parses from and displays as the exact string used on the
//! command line (`--job=training`, `--augmentation_type=color_cutout_cur`, ...).

use crate::error::MlError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! cli_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal, default = $default:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// Every value, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = MlError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => {
                        let expected: Vec<&str> = $name::ALL.iter().map(|v| v.as_str()).collect();
                        Err(MlError::invalid_input(format!(
                            "unknown {} '{}' (expected one of: {})",
                            $label,
                            other,
                            expected.join(", ")
                        )))
                    }
                }
            }
        }
    };
}

cli_enum!(
    /// The task family. Only image classification is supported.
    Task, "task", default = Classification {
        Classification => "classification",
    }
);

cli_enum!(
    /// Which stage of the pipeline a single invocation runs.
    Job, "job", default = Training {
        Preprocessing => "preprocessing",
        Training => "training",
        ResumeTraining => "resume_training",
        Testing => "testing",
    }
);

cli_enum!(
    /// Benchmark datasets.
    DatasetName, "dataset", default = Cifar10 {
        Cifar10 => "cifar10",
        Cifar100 => "cifar100",
        TinyImagenet => "tiny_imagenet",
    }
);

cli_enum!(
    /// Backbone identifiers. They namespace artifacts and select the
    /// backbone family built by `model::ModelConfig`.
    ModelType, "model type", default = Resnet50 {
        Resnet50 => "resnet50",
        EfficientnetB0 => "efficientnet_b0",
        VitB16 => "vit_b_16",
    }
);

cli_enum!(
    /// Batch augmentation strategies.
    AugmentationType, "augmentation type", default = None {
        None => "none",
        Cutout => "cutout",
        ColorCutoutNoCurriculum => "color_cutout_nocur",
        ColorCutoutCurriculum => "color_cutout_cur",
        Mixup => "mixup",
        Cutmix => "cutmix",
    }
);

cli_enum!(
    /// Validation quantity used to pick the best checkpoint.
    OptimizeObjective, "optimize objective", default = Accuracy {
        Loss => "loss",
        Accuracy => "accuracy",
        F1 => "f1",
    }
);

cli_enum!(
    OptimizerType, "optimizer", default = Adam {
        Sgd => "SGD",
        Adam => "Adam",
        AdamW => "AdamW",
    }
);

cli_enum!(
    /// Learning-rate schedules.
    SchedulerType, "scheduler", default = None {
        None => "None",
        StepLr => "StepLR",
        LambdaLr => "LambdaLR",
        CosineAnnealingLr => "CosineAnnealingLR",
        CosineAnnealingWarmRestarts => "CosineAnnealingWarmRestarts",
        ReduceLrOnPlateau => "ReduceLROnPlateau",
    }
);

impl DatasetName {
    pub fn num_classes(&self) -> usize {
        match self {
            DatasetName::Cifar10 => 10,
            DatasetName::Cifar100 => 100,
            DatasetName::TinyImagenet => 200,
        }
    }

    /// Side length of the square source images.
    pub fn image_size(&self) -> usize {
        match self {
            DatasetName::Cifar10 | DatasetName::Cifar100 => 32,
            DatasetName::TinyImagenet => 64,
        }
    }

    pub fn channels(&self) -> usize {
        3
    }
}

impl AugmentationType {
    /// Whether the strategy masks a rectangular box.
    pub fn uses_box(&self) -> bool {
        matches!(
            self,
            AugmentationType::Cutout
                | AugmentationType::ColorCutoutNoCurriculum
                | AugmentationType::ColorCutoutCurriculum
                | AugmentationType::Cutmix
        )
    }

    /// Whether the loss mixes labels from a permuted batch.
    pub fn mixes_labels(&self) -> bool {
        matches!(self, AugmentationType::Mixup | AugmentationType::Cutmix)
    }
}

impl Job {
    /// Jobs that load the train/valid splits and fit a model.
    pub fn is_training(&self) -> bool {
        matches!(self, Job::Training | Job::ResumeTraining)
    }

    /// Jobs whose artifacts are keyed by augmentation type.
    pub fn takes_augmentation(&self) -> bool {
        !matches!(self, Job::Preprocessing)
    }
}

impl SchedulerType {
    /// Schedulers stepped after every training iteration.
    pub fn steps_per_iteration(&self) -> bool {
        matches!(
            self,
            SchedulerType::StepLr
                | SchedulerType::CosineAnnealingLr
                | SchedulerType::CosineAnnealingWarmRestarts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_strings_parse_back() {
        for aug in AugmentationType::ALL {
            assert_eq!(aug.as_str().parse::<AugmentationType>().unwrap(), *aug);
        }
        for job in Job::ALL {
            assert_eq!(job.to_string().parse::<Job>().unwrap(), *job);
        }
        assert_eq!(
            "tiny_imagenet".parse::<DatasetName>().unwrap(),
            DatasetName::TinyImagenet
        );
        assert_eq!("vit_b_16".parse::<ModelType>().unwrap(), ModelType::VitB16);
        assert_eq!(
            "ReduceLROnPlateau".parse::<SchedulerType>().unwrap(),
            SchedulerType::ReduceLrOnPlateau
        );
    }

    #[test]
    fn test_unknown_value_lists_choices() {
        let err = "colour_cutout".parse::<AugmentationType>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("colour_cutout"));
        assert!(msg.contains("color_cutout_cur"));
    }

    #[test]
    fn test_parsing_is_case_sensitive() {
        assert!("CIFAR10".parse::<DatasetName>().is_err());
        assert!("adam".parse::<OptimizerType>().is_err());
    }

    #[test]
    fn test_serde_uses_cli_strings() {
        let json = serde_json::to_string(&AugmentationType::ColorCutoutNoCurriculum).unwrap();
        assert_eq!(json, "\"color_cutout_nocur\"");
        let parsed: SchedulerType = serde_json::from_str("\"StepLR\"").unwrap();
        assert_eq!(parsed, SchedulerType::StepLr);
    }

    #[test]
    fn test_dataset_shapes() {
        assert_eq!(DatasetName::Cifar100.num_classes(), 100);
        assert_eq!(DatasetName::TinyImagenet.image_size(), 64);
        assert_eq!(DatasetName::Cifar10.channels(), 3);
    }

    #[test]
    fn test_augmentation_traits() {
        assert!(AugmentationType::Cutmix.uses_box());
        assert!(AugmentationType::Cutmix.mixes_labels());
        assert!(!AugmentationType::Mixup.uses_box());
        assert!(!AugmentationType::None.uses_box());
        assert!(!AugmentationType::ColorCutoutCurriculum.mixes_labels());
    }
}
