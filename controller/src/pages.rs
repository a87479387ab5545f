//! Inline pages for the configuration surface. Both the device build and
//! the host simulator serve the same markup.

use soilctl_common::DeviceConfig;

const CONFIG_PAGE_TEMPLATE: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Soil Controller Configuration</title>
  <style>
    body{font-family:Arial,sans-serif;background:#f4f4f4;margin:0;padding:20px}
    .container{max-width:800px;margin:auto}
    .card{background:white;border-radius:8px;box-shadow:0 2px 4px rgba(0,0,0,0.1);margin-bottom:20px;padding:20px}
    .card h2{margin-top:0;color:#333;border-bottom:1px solid #ddd;padding-bottom:10px}
    label{display:block;margin-bottom:5px;font-weight:bold}
    input[type=text],input[type=password],input[type=number],select{width:100%;padding:8px;margin-bottom:15px;border:1px solid #ccc;border-radius:4px;box-sizing:border-box}
    input[type=checkbox]{margin-right:10px}
    button{background:#007BFF;color:white;padding:10px 20px;border:none;border-radius:4px;cursor:pointer;font-size:16px}
    button:hover{background:#0056b3}
    #password-card{display:none}
    .toast{position:fixed;top:20px;right:20px;background:#4CAF50;color:white;padding:15px;border-radius:5px;z-index:1000;display:none;box-shadow:0 2px 5px rgba(0,0,0,0.2)}
    @media (max-width:600px){.card{padding:15px}}
  </style>
  <script>
    function scanWiFi(){
      fetch('/scan').then(r=>r.json()).then(d=>{
        let s=document.getElementById('wifi-select');
        s.innerHTML='<option value="">Select a WiFi network</option>';
        if(d.error){alert(d.error);return}
        d.wifi.forEach(ssid=>{s.innerHTML+=`<option value="${ssid}">${ssid}</option>`})
      }).catch(()=>alert('Failed to scan WiFi'))
    }
    function showPasswordCard(){
      let s=document.getElementById('wifi-select').value;
      let c=document.getElementById('password-card');
      let i=document.getElementById('selected-ssid');
      if(s){i.value=s;c.style.display='block'}else{c.style.display='none'}
    }
    function showToast(){
      let t=document.getElementById('toast-success');
      t.style.display='block';
      setTimeout(()=>{t.style.display='none'},3000);
    }
    function saveSettings(section){
      let formData=new URLSearchParams();
      formData.append('section',section);
      if(section==='device'){
        formData.append('dev_id',document.getElementById('dev_id').value);
        formData.append('cycle',document.getElementById('cycle').value);
      }else if(section==='auto'){
        formData.append('min',document.getElementById('min').value);
        formData.append('max',document.getElementById('max').value);
        if(document.getElementById('auto').checked){formData.append('auto','on');}
      }
      fetch('/save-settings',{
        method:'POST',
        headers:{'Content-Type':'application/x-www-form-urlencoded'},
        body:formData
      })
      .then(r=>r.json())
      .then(d=>{if(d.status==='success'){showToast();}else{alert(d.error||'Failed to save settings.');}})
      .catch(e=>alert('Error: '+e));
    }
  </script>
</head>
<body>
  <div id="toast-success" class="toast">Settings saved successfully!</div>
  <div class="container">
    <h1 style="text-align:center;color:#333">Soil Controller Configuration</h1>
    <form method="POST" action="/config">
      <div class="card">
        <h2>Device</h2>
        <label for="dev_id">Device ID:</label>
        <input type="text" id="dev_id" name="dev_id" value="%DEV_ID%" placeholder="Example: esp32-01">
        <label for="cycle">Sampling Period (ms):</label>
        <input type="number" id="cycle" name="cycle" value="%CYCLE%" placeholder="Example: 60000">
        <button type="button" onclick="saveSettings('device')">Save Device Settings</button>
      </div>
      <div class="card">
        <h2>Automatic Control</h2>
        <label for="min">Soil Min (turn ON below):</label>
        <input type="number" id="min" name="min" value="%MIN%" placeholder="Example: 40">
        <label for="max">Soil Max (turn OFF at):</label>
        <input type="number" id="max" name="max" value="%MAX%" placeholder="Example: 60">
        <label for="auto">Enable Auto Control:</label>
        <input type="checkbox" id="auto" name="auto" %AUTO_CHECKED%>
        <button type="button" onclick="saveSettings('auto')">Save Auto Settings</button>
      </div>
      <div class="card">
        <h2>WiFi</h2>
        <button type="button" onclick="scanWiFi()">Scan WiFi</button>
        <label for="wifi-select">Available networks:</label>
        <select id="wifi-select" onchange="showPasswordCard()">
          <option value="">Select a WiFi network</option>
        </select>
        <div id="password-card" class="card">
          <h2>Enter WiFi Password</h2>
          <input type="hidden" id="selected-ssid" name="ssid">
          <label for="selected-pass">Password:</label>
          <input type="password" id="selected-pass" name="pass" placeholder="WiFi Password">
          <button type="submit">Connect</button>
        </div>
        <h3>Or enter manually</h3>
        <label for="ssid">WiFi SSID:</label>
        <input type="text" id="ssid" name="ssid" value="%SSID%" placeholder="WiFi Network Name">
        <label for="pass">WiFi Password:</label>
        <input type="password" id="pass" name="pass" placeholder="WiFi Password">
      </div>
      <button type="submit" style="width:100%">Save &amp; Connect to WiFi</button>
    </form>
  </div>
</body>
</html>
"#;

/// Renders the configuration page with the current settings filled in.
/// The stored WiFi password is never echoed back to the browser.
pub fn render_config_page(cfg: &DeviceConfig) -> String {
    CONFIG_PAGE_TEMPLATE
        .replace("%DEV_ID%", &html_escape(&cfg.device_id))
        .replace("%CYCLE%", &cfg.sample_period_ms.to_string())
        .replace("%MIN%", &cfg.soil_min.to_string())
        .replace("%MAX%", &cfg.soil_max.to_string())
        .replace(
            "%AUTO_CHECKED%",
            if cfg.auto_enabled { "checked" } else { "" },
        )
        .replace("%SSID%", &html_escape(&cfg.network_ssid))
}

/// Acknowledgment served right before provisioning teardown begins.
pub fn render_transition_page(ssid: &str) -> String {
    format!(
        "<html><body><h1>Configuration received.</h1>\
         <h2>Leaving setup mode and attempting to join <b>{}</b>...</h2>\
         <p>You can close this page. Once connected, the device is reachable \
         at the address assigned by your network.</p></body></html>",
        html_escape(ssid)
    )
}

fn html_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_reflects_current_config() {
        let mut cfg = DeviceConfig::default();
        cfg.device_id = "bed-7".into();
        cfg.sample_period_ms = 42_000;
        cfg.soil_min = 35;
        cfg.soil_max = 72;
        cfg.auto_enabled = true;
        cfg.network_ssid = "greenhouse".into();
        cfg.network_password = "secret".into();

        let page = render_config_page(&cfg);

        assert!(page.contains(r#"value="bed-7""#));
        assert!(page.contains(r#"value="42000""#));
        assert!(page.contains(r#"value="35""#));
        assert!(page.contains(r#"value="72""#));
        assert!(page.contains("checked"));
        assert!(page.contains(r#"value="greenhouse""#));
        assert!(!page.contains("secret"));
        for token in ["%DEV_ID%", "%CYCLE%", "%MIN%", "%MAX%", "%AUTO_CHECKED%", "%SSID%"] {
            assert!(!page.contains(token), "unfilled template token {token}");
        }
    }

    #[test]
    fn markup_from_operator_input_is_escaped() {
        let mut cfg = DeviceConfig::default();
        cfg.device_id = r#"<img src=x>"#.into();
        let page = render_config_page(&cfg);
        assert!(page.contains("&lt;img src=x&gt;"));
        assert!(!page.contains("<img src=x>"));
    }
}
