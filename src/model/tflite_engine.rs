// 该文件是 Shanan SSD 项目的一部分。
// src/model/tflite_engine.rs - 基于 TensorFlow Lite C 运行库的推理后端
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! TensorFlow Lite 后端
//!
//! 运行时加载 `tensorflowlite_c` 共享库，输入形状和元素类型从模型中读取。
//! EdgeTPU 模型通过外部委托插件接口加载 `libedgetpu`。

use std::ffi::{c_char, c_int, c_void};
use std::ptr;

use libloading::Library;
use tracing::{debug, error, info};

use super::{
  DetectionTensors, EngineError, InferenceEngine, InputTensor, ModelArtifact, ModelKind,
  TensorData, TensorShape, TensorType,
};

#[cfg(target_os = "macos")]
pub const TFLITE_SHARED_LIB: &str = "libtensorflowlite_c.dylib";
#[cfg(target_os = "windows")]
pub const TFLITE_SHARED_LIB: &str = "tensorflowlite_c.dll";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub const TFLITE_SHARED_LIB: &str = "libtensorflowlite_c.so";

const SSD_NUM_OUTPUTS: i32 = 4;

const STATUS_OK: c_int = 0;
const TYPE_FLOAT32: c_int = 1;
const TYPE_UINT8: c_int = 3;

type Handle = *mut c_void;

fn backend_error(context: &str, err: impl std::fmt::Display) -> EngineError {
  EngineError::Backend(format!("{}: {}", context, err))
}

fn check(status: c_int, context: &str) -> Result<(), EngineError> {
  if status == STATUS_OK {
    Ok(())
  } else {
    Err(backend_error(context, format!("状态码 {}", status)))
  }
}

fn symbol<T: Copy>(library: &Library, name: &str) -> Result<T, EngineError> {
  // SAFETY: 调用方保证 T 与该符号的 C 函数签名一致
  let symbol = unsafe { library.get::<T>(name.as_bytes()) }
    .map_err(|e| backend_error(&format!("找不到符号 {}", name), e))?;
  Ok(*symbol)
}

fn open_library(name: &str) -> Result<Library, EngineError> {
  // SAFETY: 只加载 TensorFlow Lite 与 EdgeTPU 运行库，不执行额外的初始化代码
  unsafe { Library::new(name) }.map_err(|e| backend_error(&format!("无法加载 {}", name), e))
}

/// TensorFlow Lite C API 函数表
struct TfLiteApi {
  model_create: unsafe extern "C" fn(*const c_void, usize) -> Handle,
  model_delete: unsafe extern "C" fn(Handle),
  options_create: unsafe extern "C" fn() -> Handle,
  options_delete: unsafe extern "C" fn(Handle),
  options_add_delegate: unsafe extern "C" fn(Handle, Handle),
  interpreter_create: unsafe extern "C" fn(Handle, Handle) -> Handle,
  interpreter_delete: unsafe extern "C" fn(Handle),
  allocate_tensors: unsafe extern "C" fn(Handle) -> c_int,
  input_tensor_count: unsafe extern "C" fn(Handle) -> i32,
  input_tensor: unsafe extern "C" fn(Handle, i32) -> Handle,
  output_tensor_count: unsafe extern "C" fn(Handle) -> i32,
  output_tensor: unsafe extern "C" fn(Handle, i32) -> Handle,
  invoke: unsafe extern "C" fn(Handle) -> c_int,
  tensor_type: unsafe extern "C" fn(Handle) -> c_int,
  tensor_num_dims: unsafe extern "C" fn(Handle) -> i32,
  tensor_dim: unsafe extern "C" fn(Handle, i32) -> i32,
  tensor_byte_size: unsafe extern "C" fn(Handle) -> usize,
  copy_from_buffer: unsafe extern "C" fn(Handle, *const c_void, usize) -> c_int,
  copy_to_buffer: unsafe extern "C" fn(Handle, *mut c_void, usize) -> c_int,
  _library: Library,
}

impl TfLiteApi {
  fn load(name: &str) -> Result<Self, EngineError> {
    let library = open_library(name)?;
    Ok(Self {
      model_create: symbol(&library, "TfLiteModelCreate")?,
      model_delete: symbol(&library, "TfLiteModelDelete")?,
      options_create: symbol(&library, "TfLiteInterpreterOptionsCreate")?,
      options_delete: symbol(&library, "TfLiteInterpreterOptionsDelete")?,
      options_add_delegate: symbol(&library, "TfLiteInterpreterOptionsAddDelegate")?,
      interpreter_create: symbol(&library, "TfLiteInterpreterCreate")?,
      interpreter_delete: symbol(&library, "TfLiteInterpreterDelete")?,
      allocate_tensors: symbol(&library, "TfLiteInterpreterAllocateTensors")?,
      input_tensor_count: symbol(&library, "TfLiteInterpreterGetInputTensorCount")?,
      input_tensor: symbol(&library, "TfLiteInterpreterGetInputTensor")?,
      output_tensor_count: symbol(&library, "TfLiteInterpreterGetOutputTensorCount")?,
      output_tensor: symbol(&library, "TfLiteInterpreterGetOutputTensor")?,
      invoke: symbol(&library, "TfLiteInterpreterInvoke")?,
      tensor_type: symbol(&library, "TfLiteTensorType")?,
      tensor_num_dims: symbol(&library, "TfLiteTensorNumDims")?,
      tensor_dim: symbol(&library, "TfLiteTensorDim")?,
      tensor_byte_size: symbol(&library, "TfLiteTensorByteSize")?,
      copy_from_buffer: symbol(&library, "TfLiteTensorCopyFromBuffer")?,
      copy_to_buffer: symbol(&library, "TfLiteTensorCopyToBuffer")?,
      _library: library,
    })
  }
}

type CreateDelegate = unsafe extern "C" fn(
  *const *const c_char,
  *const *const c_char,
  usize,
  Option<unsafe extern "C" fn(*const c_char)>,
) -> Handle;

/// 通过外部委托插件接口创建的 EdgeTPU 委托
struct EdgeTpuDelegate {
  handle: Handle,
  destroy: unsafe extern "C" fn(Handle),
  _library: Library,
}

impl EdgeTpuDelegate {
  fn load(name: &'static str) -> Result<Self, EngineError> {
    let library = open_library(name).map_err(|e| {
      error!("无法加载 EdgeTPU 委托库 {}: {}", name, e);
      EngineError::DelegateUnavailable(name)
    })?;
    let create: CreateDelegate = symbol(&library, "tflite_plugin_create_delegate")?;
    let destroy = symbol(&library, "tflite_plugin_destroy_delegate")?;

    // SAFETY: 不传入任何选项，错误回调为空
    let handle = unsafe { create(ptr::null(), ptr::null(), 0, None) };
    if handle.is_null() {
      return Err(EngineError::DelegateUnavailable(name));
    }
    info!("EdgeTPU 委托已创建: {}", name);
    Ok(Self {
      handle,
      destroy,
      _library: library,
    })
  }
}

impl Drop for EdgeTpuDelegate {
  fn drop(&mut self) {
    // SAFETY: handle 由同一个库的 create 返回，且只释放一次
    unsafe { (self.destroy)(self.handle) };
  }
}

fn tensor_type_from_code(code: c_int) -> Result<TensorType, EngineError> {
  match code {
    TYPE_UINT8 => Ok(TensorType::UInt8),
    TYPE_FLOAT32 => Ok(TensorType::Float32),
    other => Err(EngineError::InvalidShape(format!(
      "不支持的输入元素类型编码 {}",
      other
    ))),
  }
}

fn shape_from_dims(dims: &[i32]) -> Result<TensorShape, EngineError> {
  let [batch, height, width, channels] = dims else {
    return Err(EngineError::InvalidShape(format!(
      "预期 4 维 NHWC 输入, 实际为 {:?}",
      dims
    )));
  };
  let dim = |v: i32| {
    usize::try_from(v).map_err(|_| EngineError::InvalidShape(format!("维度为负: {:?}", dims)))
  };
  let shape = TensorShape {
    batch: dim(*batch)?,
    height: dim(*height)?,
    width: dim(*width)?,
    channels: dim(*channels)?,
  };
  shape.validate()?;
  Ok(shape)
}

/// 四输出 SSD 的 TFLite 解释器
///
/// 字段按释放顺序排列：解释器释放后才能销毁委托，最后卸载运行库。
pub struct TfLiteEngine {
  interpreter: Handle,
  options: Handle,
  model: Handle,
  delegate: Option<EdgeTpuDelegate>,
  api: TfLiteApi,
  model_data: Box<[u8]>,
  shape: TensorShape,
  tensor_type: TensorType,
}

impl TfLiteEngine {
  pub fn load(artifact: &ModelArtifact) -> Result<Self, EngineError> {
    info!("加载 TensorFlow Lite 运行库: {}", TFLITE_SHARED_LIB);
    let api = TfLiteApi::load(TFLITE_SHARED_LIB)?;

    let mut engine = Self {
      interpreter: ptr::null_mut(),
      options: ptr::null_mut(),
      model: ptr::null_mut(),
      delegate: None,
      api,
      model_data: artifact.data().into(),
      shape: TensorShape::nhwc(0, 0, 0),
      tensor_type: TensorType::UInt8,
    };

    // SAFETY: model_data 与 engine 同生命周期，且在 model 释放后才释放
    engine.model = unsafe {
      (engine.api.model_create)(
        engine.model_data.as_ptr().cast(),
        engine.model_data.len(),
      )
    };
    if engine.model.is_null() {
      return Err(EngineError::Backend(format!(
        "无法解析 TFLite 模型 {}",
        artifact.path().display()
      )));
    }

    // SAFETY: 以下调用只使用本函数内创建且非空的句柄
    unsafe {
      engine.options = (engine.api.options_create)();
      if let ModelKind::EdgeTpu { library } = artifact.kind() {
        let delegate = EdgeTpuDelegate::load(library)?;
        (engine.api.options_add_delegate)(engine.options, delegate.handle);
        engine.delegate = Some(delegate);
      }

      engine.interpreter = (engine.api.interpreter_create)(engine.model, engine.options);
      if engine.interpreter.is_null() {
        return Err(EngineError::Backend("无法创建 TFLite 解释器".to_string()));
      }
      check(
        (engine.api.allocate_tensors)(engine.interpreter),
        "无法分配张量",
      )?;
    }

    engine.read_input_details()?;

    // SAFETY: interpreter 非空
    let num_outputs = unsafe { (engine.api.output_tensor_count)(engine.interpreter) };
    if num_outputs != SSD_NUM_OUTPUTS {
      error!(
        "预期模型输出数量为 {}, 实际为 {}",
        SSD_NUM_OUTPUTS, num_outputs
      );
      return Err(EngineError::InvalidShape(format!(
        "预期模型输出数量为 {}, 实际为 {}",
        SSD_NUM_OUTPUTS, num_outputs
      )));
    }

    info!(
      "模型加载完成: 输入 {:?} {:?}, 委托 {}",
      engine.shape,
      engine.tensor_type,
      engine.delegate.is_some()
    );
    Ok(engine)
  }

  fn read_input_details(&mut self) -> Result<(), EngineError> {
    // SAFETY: interpreter 已创建并完成张量分配
    unsafe {
      if (self.api.input_tensor_count)(self.interpreter) < 1 {
        return Err(EngineError::InvalidShape("模型没有输入张量".to_string()));
      }
      let tensor = (self.api.input_tensor)(self.interpreter, 0);
      let dims: Vec<i32> = (0..(self.api.tensor_num_dims)(tensor))
        .map(|i| (self.api.tensor_dim)(tensor, i))
        .collect();
      self.shape = shape_from_dims(&dims)?;
      self.tensor_type = tensor_type_from_code((self.api.tensor_type)(tensor))?;
    }
    Ok(())
  }

  fn read_output(&self, index: i32) -> Result<Box<[f32]>, EngineError> {
    // SAFETY: index 小于输出数量，缓冲区大小等于张量字节数
    unsafe {
      let tensor = (self.api.output_tensor)(self.interpreter, index);
      if tensor.is_null() {
        return Err(EngineError::MalformedOutput(format!("缺少第 {} 个输出", index)));
      }
      if (self.api.tensor_type)(tensor) != TYPE_FLOAT32 {
        return Err(EngineError::MalformedOutput(format!(
          "第 {} 个输出不是 float32",
          index
        )));
      }
      let bytes = (self.api.tensor_byte_size)(tensor);
      let mut values = vec![0f32; bytes / size_of::<f32>()];
      check(
        (self.api.copy_to_buffer)(
          tensor,
          values.as_mut_ptr().cast(),
          size_of_val(values.as_slice()),
        ),
        "输出张量读取失败",
      )?;
      Ok(values.into_boxed_slice())
    }
  }
}

impl Drop for TfLiteEngine {
  fn drop(&mut self) {
    // SAFETY: 句柄各自只释放一次，解释器先于模型和选项释放
    unsafe {
      if !self.interpreter.is_null() {
        (self.api.interpreter_delete)(self.interpreter);
      }
      if !self.options.is_null() {
        (self.api.options_delete)(self.options);
      }
      if !self.model.is_null() {
        (self.api.model_delete)(self.model);
      }
    }
  }
}

impl InferenceEngine for TfLiteEngine {
  fn name(&self) -> &'static str {
    if self.delegate.is_some() {
      "tflite+edgetpu"
    } else {
      "tflite"
    }
  }

  fn input_shape(&self) -> TensorShape {
    self.shape
  }

  fn input_type(&self) -> TensorType {
    self.tensor_type
  }

  fn run(&mut self, input: &InputTensor) -> Result<DetectionTensors, EngineError> {
    if input.shape != self.shape {
      return Err(EngineError::ShapeMismatch {
        expected: self.shape,
        actual: input.shape,
      });
    }
    let (data, bytes): (*const c_void, usize) = match (&input.data, self.tensor_type) {
      (TensorData::UInt8(data), TensorType::UInt8) => (data.as_ptr().cast(), data.len()),
      (TensorData::Float32(data), TensorType::Float32) => {
        (data.as_ptr().cast(), size_of_val(&**data))
      }
      _ => {
        return Err(EngineError::TypeMismatch {
          expected: self.tensor_type,
          actual: input.tensor_type(),
        });
      }
    };

    debug!("执行模型推理");
    // SAFETY: 输入形状与类型已校验，字节数与模型输入一致
    unsafe {
      let tensor = (self.api.input_tensor)(self.interpreter, 0);
      check((self.api.copy_from_buffer)(tensor, data, bytes), "输入张量写入失败")?;
      check((self.api.invoke)(self.interpreter), "TFLite 推理失败")?;
    }

    let count = self.read_output(3)?.first().copied().unwrap_or(0.0);
    Ok(DetectionTensors {
      boxes: self.read_output(0)?,
      classes: self.read_output(1)?,
      scores: self.read_output(2)?,
      count,
    })
  }
}
