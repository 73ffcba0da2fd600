use serde::{Deserialize, Serialize};

use crate::error::ParamsError;

pub const DEFAULT_LOAD_GRACE_FRAMES: u32 = 2;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct AnimationEntry {
    pub name: String,
    pub file: String,
}

/// Editor parameters of an animated model component.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AnimatedModelParams {
    pub mesh: String,
    pub animations: Vec<AnimationEntry>,
    /// 0 is the mesh's own animation
    pub animation_select: usize,
    pub show_bones: bool,
    pub highlight_bone: usize,
    pub hide_model: bool,
    pub force_timer: Option<f32>,
    pub force_t_pose: bool,
    pub load_grace_frames: u32,
}

impl Default for AnimatedModelParams {
    fn default() -> Self {
        Self {
            mesh: String::new(),
            animations: vec![],
            animation_select: 0,
            show_bones: false,
            highlight_bone: 0,
            hide_model: false,
            force_timer: None,
            force_t_pose: false,
            load_grace_frames: DEFAULT_LOAD_GRACE_FRAMES,
        }
    }
}

impl AnimatedModelParams {
    pub fn from_json_str(json: &str) -> Result<Self, ParamsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &str) -> Result<Self, ParamsError> {
        let json_file = std::fs::File::open(path)?;
        let json_reader = std::io::BufReader::new(json_file);
        Ok(serde_json::from_reader(json_reader)?)
    }

    pub fn to_json_string(&self) -> Result<String, ParamsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let params = AnimatedModelParams::from_json_str(r#"{ "mesh": "fox.glb", "show_bones": true }"#).unwrap();

        assert_eq!(params.mesh, "fox.glb");
        assert!(params.show_bones);
        assert!(params.animations.is_empty());
        assert_eq!(params.force_timer, None);
        assert_eq!(params.load_grace_frames, DEFAULT_LOAD_GRACE_FRAMES);
    }

    #[test]
    fn survives_json_round_trip() {
        let params = AnimatedModelParams {
            mesh: "fox.glb".to_string(),
            animations: vec![AnimationEntry { name: "Run".to_string(), file: "fox_run.glb".to_string() }],
            animation_select: 1,
            force_timer: Some(0.25),
            ..Default::default()
        };

        let json = params.to_json_string().unwrap();
        assert_eq!(AnimatedModelParams::from_json_str(&json).unwrap(), params);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            AnimatedModelParams::from_json_str("{ \"mesh\": 3 }"),
            Err(ParamsError::Json(_))
        ));
    }
}
